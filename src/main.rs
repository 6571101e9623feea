mod apply;
mod classpath;
mod classset;
mod dataflow;
mod descriptor;
mod disassemble;
mod error;
mod ident;
mod instruction;
mod ir;
mod opcodes;
mod patch;
mod report;
mod resolver;
mod scan;
mod scope;
mod telemetry;
#[cfg(test)]
mod test_harness;
mod types;
mod verify;
mod writer;

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use opentelemetry::KeyValue;
use tracing::{info, warn};

use crate::apply::apply;
use crate::classpath::resolve_classpath;
use crate::classset::ClassSet;
use crate::disassemble::disassemble;
use crate::patch::{PatchScript, parse_script};
use crate::report::{BindingReport, PatchBindings, write_report};
use crate::resolver::{ResolveOptions, resolve};
use crate::scan::{Resource, scan_inputs};
use crate::scope::Scope;
use crate::telemetry::{Telemetry, add_current_span_event, current_trace_id, init_logging, with_span};
use crate::verify::Verifier;
use crate::writer::write_output;

/// CLI arguments for classpatch execution.
#[derive(Parser, Debug)]
#[command(
    name = "classpatch",
    about = "Apply placeholder-driven patch scripts to JVM class files and JAR files.",
    version
)]
struct Cli {
    /// Class file, directory or JAR to patch.
    #[arg(long, value_name = "PATH", required = true)]
    input: Vec<PathBuf>,
    /// Fallback classpath used to resolve supertypes and referenced classes.
    #[arg(long, value_name = "PATH")]
    classpath: Vec<PathBuf>,
    /// Patch scripts, applied in order.
    #[arg(long, value_name = "PATH")]
    patch: Vec<PathBuf>,
    /// Output directory, or a path ending in `.jar`.
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Print a class in patch syntax after patching; `*` prints every class.
    #[arg(long, value_name = "CLASS")]
    disassemble: Vec<String>,
    /// Write the accepted bindings as JSON; `-` writes to stdout.
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
    /// Verify trial scopes on one thread.
    #[arg(long)]
    sequential: bool,
    /// Trial scopes verified per parallel batch.
    #[arg(long, value_name = "N", default_value_t = 64)]
    batch_size: usize,
    /// OTLP/HTTP endpoint for trace export.
    #[arg(long, value_name = "URL")]
    otel: Option<String>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet);
    let telemetry = match &cli.otel {
        Some(endpoint) => Some(Telemetry::new(endpoint.clone())?),
        None => None,
    };
    let result = with_span(telemetry.as_ref(), "classpatch.run", &[], || {
        if let Some(trace_id) = current_trace_id() {
            info!(trace_id = %trace_id, "exporting traces");
        }
        run(&cli, telemetry.as_ref())
    });
    if let Some(telemetry) = &telemetry {
        telemetry.shutdown()?;
    }
    result
}

/// Durations of each phase, printed with `--timing`.
#[derive(Debug, Default)]
struct Timings {
    load_ms: u128,
    simplify_ms: u128,
    resolve_ms: u128,
    apply_ms: u128,
    store_ms: u128,
}

fn run(cli: &Cli, telemetry: Option<&Telemetry>) -> Result<()> {
    for input in &cli.input {
        if !input.exists() {
            anyhow::bail!("input not found: {}", input.display());
        }
    }
    for entry in &cli.classpath {
        if !entry.exists() {
            anyhow::bail!("classpath entry not found: {}", entry.display());
        }
    }
    let scripts = read_scripts(&cli.patch)?;

    let started_at = Instant::now();
    let mut timings = Timings::default();

    let phase = Instant::now();
    let (mut classes, resources) = with_span(telemetry, "classpatch.load", &[], || load(cli, telemetry))?;
    timings.load_ms = phase.elapsed().as_millis();

    let phase = Instant::now();
    with_span(telemetry, "classpatch.simplify", &[], || -> Result<()> {
        classes.simplify()?;
        classes.load_referenced()
    })?;
    timings.simplify_ms = phase.elapsed().as_millis();

    let options = ResolveOptions {
        parallel: !cli.sequential,
        batch_size: cli.batch_size,
    };
    let mut report = BindingReport::default();
    for (index, (name, script)) in scripts.iter().enumerate() {
        if index > 0 {
            // Classes and supertypes added by earlier scripts join the
            // inherited view before the next search.
            let phase = Instant::now();
            with_span(telemetry, "classpatch.simplify", &[], || -> Result<()> {
                classes.simplify()?;
                classes.load_referenced()
            })?;
            timings.simplify_ms += phase.elapsed().as_millis();
        }
        let attributes = [KeyValue::new("classpatch.patch", name.clone())];

        let phase = Instant::now();
        let mut resolution = with_span(telemetry, "classpatch.resolve", &attributes, || {
            let verifier = Verifier {
                classes: &classes,
                script,
            };
            resolve(
                &classes,
                script,
                &Scope::default(),
                |assignment, scope| verifier.verify(assignment, scope),
                options,
            )
        })
        .with_context(|| format!("failed to resolve {name}"))?;
        timings.resolve_ms += phase.elapsed().as_millis();
        add_current_span_event("classpatch.scope_found", &attributes);
        info!(
            patch = %name,
            classes = resolution.scope.class_bindings().count(),
            methods = resolution.scope.method_bindings().count(),
            "scope found"
        );

        let phase = Instant::now();
        let summary = with_span(telemetry, "classpatch.apply", &attributes, || {
            apply(&mut classes, script, &mut resolution)
        })
        .with_context(|| format!("failed to apply {name}"))?;
        timings.apply_ms += phase.elapsed().as_millis();
        info!(
            patch = %name,
            added_classes = summary.added_classes,
            removed_classes = summary.removed_classes,
            changed_bodies = summary.changed_bodies,
            "patch applied"
        );
        report
            .patches
            .push(PatchBindings::collect(name, &classes, &resolution.scope));
    }

    if let Some(output) = &cli.output {
        let phase = Instant::now();
        let written = with_span(telemetry, "classpatch.store", &[], || {
            write_output(&classes, output, &resources)
        })?;
        timings.store_ms = phase.elapsed().as_millis();
        info!(classes = written, output = %output.display(), "classes written");
    }

    print_disassembly(&classes, &cli.disassemble)?;
    if let Some(path) = &cli.report {
        write_report(path, &report)?;
    }

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} load_ms={} simplify_ms={} resolve_ms={} apply_ms={} store_ms={} patches={}",
            started_at.elapsed().as_millis(),
            timings.load_ms,
            timings.simplify_ms,
            timings.resolve_ms,
            timings.apply_ms,
            timings.store_ms,
            scripts.len()
        );
    }
    Ok(())
}

/// Parse every script before any class is loaded.
fn read_scripts(paths: &[PathBuf]) -> Result<Vec<(String, PatchScript)>> {
    let mut scripts = Vec::with_capacity(paths.len());
    for path in paths {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read patch {}", path.display()))?;
        let script = parse_script(&text).with_context(|| format!("invalid patch {}", path.display()))?;
        scripts.push((path.display().to_string(), script));
    }
    Ok(scripts)
}

fn load(cli: &Cli, telemetry: Option<&Telemetry>) -> Result<(ClassSet, Vec<Resource>)> {
    let scan = scan_inputs(&cli.input, telemetry)?;
    let mut entries = cli.classpath.clone();
    for path in &scan.manifest_classpath {
        if path.exists() {
            entries.push(path.clone());
        } else {
            warn!(path = %path.display(), "manifest classpath entry not found");
        }
    }
    let index = resolve_classpath(&entries)?;
    let classpath_count = index.classes.len();

    let mut classes = ClassSet::new(index);
    for scanned in scan.classes {
        classes
            .insert(scanned.parsed, Some(scanned.bytes), false)
            .with_context(|| format!("failed to load {}", scanned.origin))?;
    }
    info!(
        classes = scan.class_count,
        classpath_classes = classpath_count,
        resources = scan.resources.len(),
        "loaded inputs"
    );
    Ok((classes, scan.resources))
}

fn print_disassembly(classes: &ClassSet, names: &[String]) -> Result<()> {
    if names.is_empty() {
        return Ok(());
    }
    let mut ids = Vec::new();
    for name in names {
        if name == "*" {
            ids.extend(classes.candidates());
            continue;
        }
        match classes.find(name) {
            Some(id) if !classes.class(id).hidden && !classes.class(id).removed => ids.push(id),
            _ => anyhow::bail!("class not found: {name}"),
        }
    }
    let mut stdout = io::stdout().lock();
    for id in ids {
        stdout
            .write_all(disassemble(classes, id).as_bytes())
            .context("failed to write disassembly")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ACC_PUBLIC, ACC_STATIC, Insn};
    use crate::opcodes;
    use crate::scan::parse_class_bytes;
    use crate::test_harness::{ClassFileBuilder, write_class};

    fn greeter() -> Vec<u8> {
        let mut builder = ClassFileBuilder::new("p/Greeter", Some("java/lang/Object"));
        let helper = builder.method_ref("p/Greeter", "helper", "()V");
        let [high, low] = helper.to_be_bytes();
        let greet = vec![
            opcodes::ICONST_1,
            opcodes::POP,
            opcodes::INVOKESTATIC,
            high,
            low,
            opcodes::RETURN,
        ];
        builder.add_method(ACC_PUBLIC | ACC_STATIC, "greet", "()V", Some((1, 0, greet)));
        builder.add_method(ACC_PUBLIC | ACC_STATIC, "helper", "()V", Some((0, 0, vec![opcodes::RETURN])));
        builder.build()
    }

    fn untouched() -> Vec<u8> {
        let mut builder = ClassFileBuilder::new("p/Other", Some("java/lang/Object"));
        builder.add_field(ACC_PUBLIC | ACC_STATIC, "LIMIT", "I", Some(3));
        builder.build()
    }

    const PATCH: &str = "\
.class ~G
    .method ~greet ()V static
        -push-int 1
        -pop
        .invoke-static ~G ~helper ()V
        .return
    .end-method
.end-class
";

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("classpatch").chain(args.iter().copied())).expect("cli")
    }

    #[test]
    fn patch_run_rewrites_only_matched_classes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let input = temp.path().join("in");
        let output = temp.path().join("out");
        write_class(&input, "p/Greeter", &greeter());
        let other = untouched();
        write_class(&input, "p/Other", &other);
        let patch = temp.path().join("strip.patch");
        fs::write(&patch, PATCH).expect("write patch");
        let report = temp.path().join("report.json");

        let args = cli(&[
            "--input",
            input.to_str().expect("path"),
            "--patch",
            patch.to_str().expect("path"),
            "--output",
            output.to_str().expect("path"),
            "--report",
            report.to_str().expect("path"),
            "--sequential",
        ]);
        run(&args, None).expect("run");

        let patched = fs::read(output.join("p/Greeter.class")).expect("patched class");
        let parsed = parse_class_bytes(&patched).expect("parse");
        let greet = parsed
            .methods
            .iter()
            .find(|method| method.name == "greet")
            .expect("greet");
        let insns = &greet.code.as_ref().expect("code").insns;
        assert_eq!(insns.len(), 2);
        assert!(matches!(insns[0], Insn::Invoke { opcode: opcodes::INVOKESTATIC, .. }));
        assert_eq!(insns[1], Insn::Simple(opcodes::RETURN));

        let copied = fs::read(output.join("p/Other.class")).expect("copied class");
        assert_eq!(copied, other);

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&report).expect("report")).expect("json");
        assert_eq!(value["patches"][0]["classes"][0]["weak"], "~G");
        assert_eq!(value["patches"][0]["classes"][0]["name"], "p/Greeter");
        assert_eq!(value["patches"][0]["methods"][0]["weak"], "~greet");
        assert_eq!(value["patches"][0]["methods"][1]["name"], "helper");
    }

    #[test]
    fn unmatched_patch_fails_with_best_element() {
        let temp = tempfile::tempdir().expect("tempdir");
        let input = temp.path().join("in");
        write_class(&input, "p/Greeter", &greeter());
        let patch = temp.path().join("miss.patch");
        fs::write(
            &patch,
            ".class ~G\n.method ~greet ()V static\n.push-int 2\n.any\n.end-method\n.end-class\n",
        )
        .expect("write patch");

        let args = cli(&[
            "--input",
            input.to_str().expect("path"),
            "--patch",
            patch.to_str().expect("path"),
        ]);
        let err = run(&args, None).expect_err("no match");
        assert!(format!("{err:#}").contains("could not find a match"), "{err:#}");
    }

    #[test]
    fn invalid_scripts_fail_before_loading() {
        let temp = tempfile::tempdir().expect("tempdir");
        let patch = temp.path().join("bad.patch");
        fs::write(&patch, ".class ~A\n.method ~m ()V\n").expect("write patch");
        let err = read_scripts(&[patch]).expect_err("invalid");
        assert!(format!("{err:#}").contains("end-method"), "{err:#}");
    }

    #[test]
    fn batch_size_defaults_to_sixty_four() {
        let args = cli(&["--input", "a.jar"]);
        assert_eq!(args.batch_size, 64);
        assert!(!args.sequential);
        assert!(args.patch.is_empty());
    }
}

use std::fmt;

/// Name token from a patch script. A leading `~` makes it weak: an alias
/// bound on first use. `*` is the wildcard and is never bound.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct Ident {
    pub(crate) name: String,
    pub(crate) weak: bool,
}

impl Ident {
    pub(crate) fn parse(token: &str) -> Self {
        match token.strip_prefix('~') {
            Some(name) => Self {
                name: name.to_string(),
                weak: true,
            },
            None => Self {
                name: token.to_string(),
                weak: false,
            },
        }
    }

    pub(crate) fn is_wildcard(&self) -> bool {
        self.name == "*"
    }

    /// Weak and not the wildcard: a name that takes part in binding.
    pub(crate) fn is_bindable(&self) -> bool {
        self.weak && !self.is_wildcard()
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.weak {
            write!(f, "~{}", self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tilde_marks_weak_identifiers() {
        let ident = Ident::parse("~Player");
        assert!(ident.weak);
        assert_eq!(ident.name, "Player");
        assert_eq!(ident.to_string(), "~Player");

        let strong = Ident::parse("java/lang/String");
        assert!(!strong.weak);
        assert!(!strong.is_bindable());
    }

    #[test]
    fn wildcard_is_never_bindable() {
        assert!(Ident::parse("*").is_wildcard());
        assert!(!Ident::parse("~*").is_bindable());
    }
}

// ABOUTME: decides which program names may ever be executed through the gateway.
// ABOUTME: exact byte matching only; no paths, prefixes or patterns.

use runcmd_common::BUILTIN_COMMANDS;

#[derive(Debug, Clone)]
pub struct Allowlist {
    programs: Vec<String>,
}

impl Allowlist {
    pub fn builtin() -> Self {
        Self::from_programs(BUILTIN_COMMANDS.iter().copied())
    }

    pub fn from_programs<I, S>(programs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            programs: programs.into_iter().map(Into::into).collect(),
        }
    }

    pub fn permits(&self, command: &str) -> bool {
        self.programs.iter().any(|p| p.as_str() == command)
    }

    pub fn programs(&self) -> &[String] {
        &self.programs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_permits_exactly_minikube_and_az() {
        let allow = Allowlist::builtin();
        assert!(allow.permits("minikube"));
        assert!(allow.permits("az"));
        assert_eq!(allow.programs().len(), 2);
    }

    #[test]
    fn rejects_near_misses() {
        let allow = Allowlist::builtin();
        for command in [
            "curl",
            "",
            "Minikube",
            "minikube ",
            "/usr/local/bin/minikube",
            "./az",
            "az;rm",
            "mini",
            "minikube2",
        ] {
            assert!(!allow.permits(command), "{command:?} must not be permitted");
        }
    }
}

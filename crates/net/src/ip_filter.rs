//! Allow/deny filtering of client addresses by IP prefix.

/// Prefix-based IP filter.
///
/// A deny prefix rejects outright. When the allow list is non-empty, an
/// address must match one of its prefixes to pass.
#[derive(Debug, Default, Clone)]
pub struct IpFilter {
    allow: Vec<String>,
    deny: Vec<String>,
}

impl IpFilter {
    /// Filter that passes everything.
    pub fn new() -> IpFilter {
        IpFilter::default()
    }

    /// Build from configured prefix lists.
    pub fn from_rules(allow: &[String], deny: &[String]) -> IpFilter {
        IpFilter {
            allow: allow.to_vec(),
            deny: deny.to_vec(),
        }
    }

    /// Add an allow prefix.
    pub fn add_allow(&mut self, prefix: &str) {
        self.allow.push(prefix.to_string());
    }

    /// Add a deny prefix.
    pub fn add_deny(&mut self, prefix: &str) {
        self.deny.push(prefix.to_string());
    }

    /// Decide whether an address may connect.
    pub fn check_pass(&self, ip: &str) -> bool {
        if self.deny.iter().any(|p| ip.starts_with(p.as_str())) {
            return false;
        }
        if self.allow.is_empty() {
            return true;
        }
        self.allow.iter().any(|p| ip.starts_with(p.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_passes() {
        assert!(IpFilter::new().check_pass("10.0.0.1"));
    }

    #[test]
    fn test_deny_prefix() {
        let mut f = IpFilter::new();
        f.add_deny("10.0.");
        assert!(!f.check_pass("10.0.0.1"));
        assert!(f.check_pass("10.1.0.1"));
    }

    #[test]
    fn test_allow_list_restricts() {
        let mut f = IpFilter::new();
        f.add_allow("127.0.0.1");
        assert!(f.check_pass("127.0.0.1"));
        assert!(!f.check_pass("192.168.0.5"));
    }

    #[test]
    fn test_deny_wins_over_allow() {
        let mut f = IpFilter::new();
        f.add_allow("10.");
        f.add_deny("10.0.");
        assert!(!f.check_pass("10.0.0.1"));
        assert!(f.check_pass("10.1.0.1"));
    }
}

//! Admission decisions and their HTTP-adjacent headers (spec §4.7, §6).

/// The outcome of an admission check.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Whether the request is admitted.
    pub allowed: bool,
    /// The tier name in effect (e.g. `"free"`, `"cost100"`).
    pub tier: &'static str,
    /// Units (requests or cumulative score) consumed so far in the
    /// current window, *including* this request if admitted.
    pub used: f64,
    /// The limit for the active tier.
    pub limit: f64,
    /// Seconds until the caller should retry.
    pub retry_after_secs: u64,
}

impl Decision {
    /// Remaining budget in the current window, floored at zero.
    #[must_use]
    pub fn remaining(&self) -> f64 {
        (self.limit - self.used).max(0.0)
    }

    /// The four response headers admission denials carry (spec §6):
    /// `X-RateLimit-{Limit,Remaining,Reset}` and `Retry-After`.
    #[must_use]
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("X-RateLimit-Limit", format_units(self.limit)),
            ("X-RateLimit-Remaining", format_units(self.remaining())),
            ("X-RateLimit-Reset", self.retry_after_secs.to_string()),
            ("Retry-After", self.retry_after_secs.to_string()),
        ]
    }
}

fn format_units(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_never_goes_negative() {
        let d = Decision { allowed: false, tier: "free", used: 105.0, limit: 100.0, retry_after_secs: 60 };
        assert_eq!(d.remaining(), 0.0);
    }

    #[test]
    fn headers_include_all_four_fields() {
        let d = Decision { allowed: true, tier: "free", used: 3.0, limit: 100.0, retry_after_secs: 60 };
        let headers = d.headers();
        let names: Vec<&str> = headers.iter().map(|(n, _)| *n).collect();
        assert!(names.contains(&"X-RateLimit-Limit"));
        assert!(names.contains(&"X-RateLimit-Remaining"));
        assert!(names.contains(&"X-RateLimit-Reset"));
        assert!(names.contains(&"Retry-After"));
    }

    #[test]
    fn retry_after_never_exceeds_the_window() {
        let d = Decision { allowed: false, tier: "cost100", used: 150.0, limit: 100.0, retry_after_secs: 60 };
        assert!(d.retry_after_secs <= 60, "spec §8 admission fairness: Retry-After <= 60");
    }
}

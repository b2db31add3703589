use std::str::FromStr;

pub fn env_var_truthy(name: &str) -> bool {
    match std::env::var(name) {
        Ok(v) => {
            let v = v.to_ascii_lowercase();
            v == "1" || v == "true" || v == "yes" || v == "on"
        }
        Err(_) => false,
    }
}

/// Parses an environment variable, ignoring it when unset or unparsable.
pub fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}

/// Number of logical cores on this host, never zero.
pub fn host_parallelism() -> usize {
    num_cpus::get().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values() {
        std::env::set_var("MAPREDUCE_TEST_TRUTHY", "Yes");
        assert!(env_var_truthy("MAPREDUCE_TEST_TRUTHY"));
        std::env::set_var("MAPREDUCE_TEST_TRUTHY", "0");
        assert!(!env_var_truthy("MAPREDUCE_TEST_TRUTHY"));
        std::env::remove_var("MAPREDUCE_TEST_TRUTHY");
        assert!(!env_var_truthy("MAPREDUCE_TEST_TRUTHY"));
    }

    #[test]
    fn parse_ignores_garbage() {
        std::env::set_var("MAPREDUCE_TEST_PARSE", " 12 ");
        assert_eq!(env_parse::<usize>("MAPREDUCE_TEST_PARSE"), Some(12));
        std::env::set_var("MAPREDUCE_TEST_PARSE", "twelve");
        assert_eq!(env_parse::<usize>("MAPREDUCE_TEST_PARSE"), None);
        std::env::remove_var("MAPREDUCE_TEST_PARSE");
    }

    #[test]
    fn parallelism_is_positive() {
        assert!(host_parallelism() >= 1);
    }
}

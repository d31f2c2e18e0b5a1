/// MQTT-style wildcard matching: `+` matches exactly one topic segment, a trailing `#` matches
/// the remaining segments (including zero of them). Neither wildcard may appear anywhere a
/// literal broker would reject it, but this matcher is permissive — callers are expected to
/// validate patterns at subscribe time with [`validate_pattern`].
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let pattern_segs: Vec<&str> = pattern.split('/').collect();
    let topic_segs: Vec<&str> = topic.split('/').collect();

    let mut pi = 0;
    let mut ti = 0;
    while pi < pattern_segs.len() {
        match pattern_segs[pi] {
            "#" => return true,
            "+" => {
                if ti >= topic_segs.len() {
                    return false;
                }
            }
            literal => {
                if ti >= topic_segs.len() || topic_segs[ti] != literal {
                    return false;
                }
            }
        }
        pi += 1;
        ti += 1;
    }
    ti == topic_segs.len()
}

/// `#` is only legal as the last segment; `+` may appear in any segment position. Rejecting
/// malformed patterns at subscribe time keeps the router's registry free of patterns that could
/// never match anything.
pub fn validate_pattern(pattern: &str) -> Result<(), String> {
    let segs: Vec<&str> = pattern.split('/').collect();
    for (i, seg) in segs.iter().enumerate() {
        if *seg == "#" && i != segs.len() - 1 {
            return Err(format!("'#' must be the last segment in pattern {pattern:?}"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_matches_exact_topic() {
        assert!(topic_matches("tags/sim/t1", "tags/sim/t1"));
        assert!(!topic_matches("tags/sim/t1", "tags/sim/t2"));
    }

    #[test]
    fn plus_matches_one_segment() {
        assert!(topic_matches("in/+", "in/x"));
        assert!(!topic_matches("in/+", "in/x/y"));
        assert!(!topic_matches("in/+", "in"));
    }

    #[test]
    fn hash_matches_remaining_segments_including_zero() {
        assert!(topic_matches("flows/#", "flows"));
        assert!(topic_matches("flows/#", "flows/f1/execution"));
    }

    #[test]
    fn combined_wildcards() {
        assert!(topic_matches("tags/+/#", "tags/sim/t1/sub"));
        assert!(!topic_matches("tags/+/#", "tags"));
    }

    #[test]
    fn validate_pattern_rejects_hash_not_last() {
        assert!(validate_pattern("a/#/b").is_err());
        assert!(validate_pattern("a/#").is_ok());
        assert!(validate_pattern("a/+/b").is_ok());
    }
}

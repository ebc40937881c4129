//! Cache key builders.
//!
//! The remote tier adds its configured prefix (`relay:` by default) in front
//! of these, giving `relay:presence:{subject_id}`.

/// Cache key for a subject's presence record.
pub fn presence(subject_id: &str) -> String {
    format!("presence:{subject_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_key() {
        assert_eq!(presence("80351110224678912"), "presence:80351110224678912");
    }
}

//! # Instance Identity (C12)
//!
//! One stable random id per relay process, used as `originalInstanceId` on
//! every broadcast message and as the value side of the ownership registry.

use uuid::Uuid;

/// Generates a short, human-readable instance id from a UUID, in the same
/// "XXXX-XXXX" shape the teacher used for agent ids.
pub fn generate_instance_id() -> String {
    let uuid = Uuid::new_v4().to_string();
    let short = &uuid[..8];
    format!("{}-{}", short[..4].to_uppercase(), short[4..8].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_distinct_ids() {
        let a = generate_instance_id();
        let b = generate_instance_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 9);
        assert!(a.contains('-'));
    }
}

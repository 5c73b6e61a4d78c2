use serde::{Deserialize, Serialize};

/// Published once a link has been verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationEvent {
    pub user_id: String,
    pub minecraft_uuid: String,
    /// Verified links sharing this identity, including the one just verified.
    pub existing_con_count: i64,
}

impl VerificationEvent {
    /// Message key used by downstream consumers for deduplication.
    pub fn key(&self) -> String {
        format!("{}-{}", self.minecraft_uuid, self.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_identity_then_owner() {
        let event = VerificationEvent {
            user_id: "42".to_string(),
            minecraft_uuid: "abc".to_string(),
            existing_con_count: 1,
        };
        assert_eq!(event.key(), "abc-42");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["minecraftUuid"], "abc");
        assert_eq!(json["existingConCount"], 1);
    }
}

use uuid::Uuid;

/// New opaque record id. UUIDv7 keeps ids roughly creation-ordered.
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

/// Task identifiers are opaque strings minted by the submitting side
/// (UUID v4 text in practice, but any non-empty string is accepted).
pub type TaskId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifier assigned by the remote queue to a submitted job.
pub type RemoteJobId = String;

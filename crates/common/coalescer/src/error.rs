#[derive(thiserror::Error, Debug)]
pub enum SchedulerError {
    #[error("Failed to deliver the batch for {key}")]
    DeliveryFailed {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("The scheduler has been shut down")]
    ShutDown,
}

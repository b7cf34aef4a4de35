/// Errors that can occur while queueing or draining framed packets.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The packet exceeds the buffer's maximum message size.
    #[error("packet too large ({size} bytes, max {max})")]
    Oversized { size: usize, max: usize },

    /// Adding the packet would exceed the buffer's total byte budget.
    #[error("queue full ({queued} bytes queued, budget {budget})")]
    QueueFull { queued: usize, budget: usize },

    /// The buffer already holds the maximum number of packets.
    #[error("too many queued packets (max {max})")]
    TooManyMessages { max: usize },

    /// The next queued packet does not fit the caller's buffer.
    /// The packet is retained and can be retried with a larger buffer.
    #[error("packet of {size} bytes does not fit output of {max}")]
    Truncated { size: usize, max: usize },

    /// The output slice passed to a wire drain is too small to guarantee
    /// forward progress.
    #[error("wire drain output must be at least {min} bytes")]
    OutputTooSmall { min: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;

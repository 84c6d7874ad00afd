//! 写入端错误类型

/// 写入错误。
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// 存储不可达（网络错误、超时）。
    #[error("sink unavailable: {0}")]
    Unavailable(String),
    /// 存储返回非成功状态。
    #[error("sink rejected write: status={status} body={body}")]
    Rejected { status: u16, body: String },
    /// 写入端构造失败。
    #[error("sink setup failed: {0}")]
    Setup(String),
}

impl StorageError {
    /// 是否值得保留批次重试。
    ///
    /// 4xx 表示数据本身无法写入，重试也不会成功。
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Unavailable(_) => true,
            StorageError::Rejected { status, .. } => !(400..500).contains(status),
            StorageError::Setup(_) => false,
        }
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

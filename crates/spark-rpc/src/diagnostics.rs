//! 非致命诊断事件与可注入的上报器。
//!
//! # 设计动机（Why）
//! - 引导过程中存在两类“继续执行但必须让人知道”的情况：使用了已弃用的统一 `timeout`，
//!   以及在 Unix Domain Socket 上提供了 TLS 材料；
//! - 把它们建模为结构化事件并通过 [`DiagnosticReporter`] 上报，测试可以确定性地断言，
//!   生产环境则默认落到 `tracing`。
//!
//! # 使用契约（What）
//! - 上报器只观察，不能中止构造；
//! - 每个事件携带稳定错误码，弃用类事件额外携带 [`DeprecationNotice`] 元数据。

use std::{
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tracing::warn;

/// 弃用符号的元信息。
///
/// # 字段说明（What）
/// - `symbol`：弃用符号全名；
/// - `since` / `removal`：宣告弃用与计划移除的版本；
/// - `migration_hint`：迁移建议。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeprecationNotice {
    pub symbol: &'static str,
    pub since: &'static str,
    pub removal: &'static str,
    pub migration_hint: Option<&'static str>,
}

impl DeprecationNotice {
    /// 构造弃用元信息。
    pub const fn new(
        symbol: &'static str,
        since: &'static str,
        removal: &'static str,
        migration_hint: Option<&'static str>,
    ) -> Self {
        Self {
            symbol,
            since,
            removal,
            migration_hint,
        }
    }
}

/// 统一 `timeout` 参数的弃用元信息。
pub const DEPRECATED_TIMEOUT: DeprecationNotice = DeprecationNotice::new(
    "spark_rpc::ClientOptions::timeout",
    "0.1.0",
    "0.3.0",
    Some("改用 connect_timeout 与 socket_timeout 分别约束建连与读写"),
);

/// 引导过程中产生的非致命事件。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Diagnostic {
    /// 使用了已弃用的统一 `timeout`，其值同时覆盖建连与读写超时。
    DeprecatedTimeout,
    /// 为 Unix Domain Socket 端点提供了 TLS 材料，材料被忽略。
    TlsIgnoredForUnixSocket { path: PathBuf },
}

impl Diagnostic {
    /// 稳定事件码。
    pub fn code(&self) -> &'static str {
        match self {
            Diagnostic::DeprecatedTimeout => "spark.rpc.deprecated.timeout",
            Diagnostic::TlsIgnoredForUnixSocket { .. } => "spark.rpc.tls.ignored_for_unix_socket",
        }
    }

    /// 人类可读的描述。
    pub fn message(&self) -> String {
        match self {
            Diagnostic::DeprecatedTimeout => {
                "`timeout` is deprecated; it overrides both connect_timeout and socket_timeout"
                    .to_owned()
            }
            Diagnostic::TlsIgnoredForUnixSocket { path } => format!(
                "TLS material is not applicable to unix socket `{}` and is ignored",
                path.display()
            ),
        }
    }

    /// 弃用元信息（仅弃用类事件存在）。
    pub fn deprecation(&self) -> Option<&'static DeprecationNotice> {
        match self {
            Diagnostic::DeprecatedTimeout => Some(&DEPRECATED_TIMEOUT),
            Diagnostic::TlsIgnoredForUnixSocket { .. } => None,
        }
    }
}

/// 诊断事件的接收端。
pub trait DiagnosticReporter: Send + Sync {
    /// 接收一个事件。
    fn report(&self, diagnostic: &Diagnostic);
}

/// 默认上报器：以 `tracing::warn!` 输出，弃用元信息作为结构化字段。
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReporter;

impl DiagnosticReporter for TracingReporter {
    fn report(&self, diagnostic: &Diagnostic) {
        let message = diagnostic.message();
        match diagnostic.deprecation() {
            Some(notice) => warn!(
                code = diagnostic.code(),
                symbol = notice.symbol,
                since = notice.since,
                removal = notice.removal,
                migration = notice.migration_hint.unwrap_or_default(),
                "{message}"
            ),
            None => warn!(code = diagnostic.code(), "{message}"),
        }
    }
}

/// 记录全部事件的上报器，克隆得到的句柄共享同一份记录。
#[derive(Clone, Debug, Default)]
pub struct CollectingReporter {
    records: Arc<Mutex<Vec<Diagnostic>>>,
}

impl CollectingReporter {
    /// 构造空的上报器。
    pub fn new() -> Self {
        Self::default()
    }

    /// 已记录事件的快照。
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.lock().clone()
    }

    /// 取走并清空已记录的事件。
    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.lock())
    }

    /// 是否记录过与 `diagnostic` 相等的事件。
    pub fn contains(&self, diagnostic: &Diagnostic) -> bool {
        self.lock().iter().any(|recorded| recorded == diagnostic)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Diagnostic>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DiagnosticReporter for CollectingReporter {
    fn report(&self, diagnostic: &Diagnostic) {
        self.lock().push(diagnostic.clone());
    }
}

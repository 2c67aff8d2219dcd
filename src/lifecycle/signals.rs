//! 可取消的运行上下文
//!
//! 第一次收到终止信号（或父令牌被取消）时取消一次。此后信号不再被吞掉：
//! 再次收到任一监听的信号按默认处置终止进程，退出码 `128 + signo`，
//! 卡在打开或迁移中的节点可以被第二次 Ctrl-C 强行结束。

use std::io;

use futures::future::select_all;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Linux 上的 SIGPWR
#[cfg(target_os = "linux")]
const SIGPWR: i32 = 30;

/// 默认处理的终止信号
pub fn default_signals() -> Vec<SignalKind> {
    #[allow(unused_mut)]
    let mut kinds = vec![
        SignalKind::interrupt(),
        SignalKind::terminate(),
        SignalKind::quit(),
    ];
    #[cfg(target_os = "linux")]
    kinds.push(SignalKind::from_raw(SIGPWR));
    kinds
}

/// 运行上下文
pub struct RunContext {
    token: CancellationToken,
    watcher: Option<JoinHandle<()>>,
}

impl RunContext {
    /// 监听默认终止信号
    pub fn new(parent: &CancellationToken) -> io::Result<Self> {
        Self::with_signals(parent, &default_signals())
    }

    /// 监听指定信号；必须在 tokio 运行时内调用
    pub fn with_signals(parent: &CancellationToken, kinds: &[SignalKind]) -> io::Result<Self> {
        let token = parent.child_token();

        let mut streams: Vec<(SignalKind, Signal)> = Vec::with_capacity(kinds.len());
        for kind in kinds {
            streams.push((*kind, signal(*kind)?));
        }

        let watcher = if streams.is_empty() {
            None
        } else {
            Some(tokio::spawn(watch(streams, token.clone())))
        };

        Ok(Self { token, watcher })
    }

    /// 不监听信号，只跟随父令牌（测试与嵌入场景）
    pub fn detached(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            watcher: None,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

async fn watch(mut streams: Vec<(SignalKind, Signal)>, token: CancellationToken) {
    let first = tokio::select! {
        _ = token.cancelled() => None,
        kind = next_signal(&mut streams) => match kind {
            Some(kind) => Some(kind),
            None => return,
        },
    };

    if let Some(kind) = first {
        log::info!(
            "Received signal {}, shutting down",
            kind.as_raw_value()
        );
        token.cancel();
    }

    if let Some(kind) = next_signal(&mut streams).await {
        log::error!(
            "Received signal {} again during shutdown, exiting immediately",
            kind.as_raw_value()
        );
        std::process::exit(128 + kind.as_raw_value());
    }
}

/// 等待任一信号；信号驱动已关闭时返回 `None`
async fn next_signal(streams: &mut [(SignalKind, Signal)]) -> Option<SignalKind> {
    let waits = streams
        .iter_mut()
        .map(|(kind, stream)| {
            let kind = *kind;
            Box::pin(async move { stream.recv().await.map(|_| kind) })
        })
        .collect::<Vec<_>>();

    let (received, _, _) = select_all(waits).await;
    received
}

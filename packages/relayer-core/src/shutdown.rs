use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// 广播关闭信号的一端，由宿主进程持有
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    notify: broadcast::Sender<()>,
    /// 信号是粘滞的：发出之后才订阅的任务同样能看到
    triggered: Arc<AtomicBool>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(2);
        Self {
            notify,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            shutdown: self.triggered.load(Ordering::SeqCst),
            notify: self.notify.subscribe(),
            triggered: self.triggered.clone(),
        }
    }

    /// 通知所有订阅的任务退出
    pub fn shutdown(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        let _ = self.notify.send(());
    }
}

/// 监听关闭信号。信号只发送一次，收到后保持已关闭状态
#[derive(Debug)]
pub struct Shutdown {
    shutdown: bool,
    notify: broadcast::Receiver<()>,
    triggered: Arc<AtomicBool>,
}

impl Shutdown {
    /// 等待关闭信号
    pub async fn recv(&mut self) {
        if self.is_triggered() {
            return;
        }

        // 只会发送一个值，不会出现 lag 错误；发送端关闭同样视为关闭
        let _ = self.notify.recv().await;

        self.shutdown = true;
    }

    /// 非阻塞检查
    pub fn is_shutdown(&mut self) -> bool {
        if !self.is_triggered() {
            match self.notify.try_recv() {
                Err(broadcast::error::TryRecvError::Empty) => {}
                _ => self.shutdown = true,
            }
        }
        self.shutdown
    }

    fn is_triggered(&mut self) -> bool {
        if self.triggered.load(Ordering::SeqCst) {
            self.shutdown = true;
        }
        self.shutdown
    }
}

impl Clone for Shutdown {
    fn clone(&self) -> Self {
        Self {
            shutdown: self.shutdown || self.triggered.load(Ordering::SeqCst),
            notify: self.notify.resubscribe(),
            triggered: self.triggered.clone(),
        }
    }
}

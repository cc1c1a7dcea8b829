//! # Bus モジュール
//!
//! アクター間通信のためのプロセス内メッセージバスを提供します。
//!
//! アクターIDごとに1つのメールボックス（FIFO）を持ち、メールボックスは
//! 最初の送信または受信時に遅延生成されます。送信は決してブロックせず、
//! 受信は対象IDのメッセージが届くまで呼び出し元タスクを停止させます。
//!
//! バスは無制限にバッファリングし、送信側へのバックプレッシャーは
//! ありません。フロー制御はディスパッチャの積載量管理が担います。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tracing::trace;

use crate::messaging::envelope::Envelope;
use crate::models::common::ActorId;
use crate::models::traits::Channel;

/// バス操作のエラー
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("mailbox {0} is closed")]
    Closed(ActorId),
}

/// 1アクター分のメールボックス
///
/// 送信側ハンドルをメールボックス自身が保持するため、受信側が
/// `None` を受け取ることはありません。
#[derive(Debug)]
struct Mailbox {
    outbox: mpsc::UnboundedSender<Envelope>,
    inbox: AsyncMutex<mpsc::UnboundedReceiver<Envelope>>,
}

impl Mailbox {
    fn new() -> Self {
        let (outbox, inbox) = mpsc::unbounded_channel();
        Self {
            outbox,
            inbox: AsyncMutex::new(inbox),
        }
    }
}

/// プロセス内メッセージバス
#[derive(Debug, Default)]
pub struct InMemoryChannel {
    mailboxes: Mutex<HashMap<ActorId, Arc<Mailbox>>>,
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// メールボックスを取得（存在しなければ作成）
    ///
    /// 確認と作成は同じロック区間で行うため、同時に初回アクセスが
    /// あっても作成されるメールボックスは1つだけです。
    fn mailbox(&self, id: ActorId) -> Arc<Mailbox> {
        let mut mailboxes = self.mailboxes.lock();
        Arc::clone(mailboxes.entry(id).or_insert_with(|| {
            trace!(actor_id = id, "メールボックス作成");
            Arc::new(Mailbox::new())
        }))
    }

    /// 作成済みメールボックス数
    #[cfg(test)]
    pub fn mailbox_count(&self) -> usize {
        self.mailboxes.lock().len()
    }
}

impl Channel for InMemoryChannel {
    fn send(&self, envelope: Envelope) -> Result<(), ChannelError> {
        let receiver = envelope.receiver();
        trace!(sender = envelope.sender(), receiver, kind = %envelope.kind(), "送信");
        self.mailbox(receiver)
            .outbox
            .send(envelope)
            .map_err(|_| ChannelError::Closed(receiver))
    }

    async fn receive(&self, receiver: ActorId) -> Result<Envelope, ChannelError> {
        let mailbox = self.mailbox(receiver);
        let mut inbox = mailbox.inbox.lock().await;
        inbox.recv().await.ok_or(ChannelError::Closed(receiver))
    }
}

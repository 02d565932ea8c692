use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::SipPingError;
use crate::sip::message::SipMessage;
use crate::sip::parser::parse_sip_message;
use crate::transport::{SipTransport, TransportFuture};

/// テスト用の共通モックトランスポート
/// - 送信メッセージの記録
/// - 送信カウント
/// - オプションの失敗注入
/// - 受信データのスクリプト化（空なら永久に待機）
pub struct MockTransport {
    pub sent: Mutex<Vec<(Vec<u8>, SocketAddr)>>,
    pub send_count: AtomicUsize,
    pub should_fail: AtomicBool,
    pub replies: Mutex<VecDeque<(Vec<u8>, SocketAddr)>>,
    pub recv_count: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            send_count: AtomicUsize::new(0),
            should_fail: AtomicBool::new(false),
            replies: Mutex::new(VecDeque::new()),
            recv_count: AtomicUsize::new(0),
        }
    }

    /// should_fail フラグを設定する
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }

    /// 次の recv_from で返すデータを積む
    pub fn push_reply(&self, data: &[u8], from: SocketAddr) {
        self.replies.lock().unwrap().push_back((data.to_vec(), from));
    }

    /// 送信成功したメッセージ数を返す
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// 送信されたメッセージをパースして返す
    pub fn sent_messages(&self) -> Vec<(SipMessage, SocketAddr)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(data, addr)| parse_sip_message(data).ok().map(|msg| (msg, *addr)))
            .collect()
    }
}

impl SipTransport for MockTransport {
    fn send_to<'a>(&'a self, data: &'a [u8], addr: SocketAddr) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.send_count.fetch_add(1, Ordering::Relaxed);
            if self.should_fail.load(Ordering::Relaxed) {
                return Err(SipPingError::NetworkError(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "mock failure",
                )));
            }
            self.sent.lock().unwrap().push((data.to_vec(), addr));
            Ok(())
        })
    }

    fn recv_from(&self) -> TransportFuture<'_, (Vec<u8>, SocketAddr)> {
        Box::pin(async move {
            self.recv_count.fetch_add(1, Ordering::Relaxed);
            let next = self.replies.lock().unwrap().pop_front();
            match next {
                Some(reply) => Ok(reply),
                None => std::future::pending().await,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn addr() -> SocketAddr {
        "127.0.0.1:5060".parse().unwrap()
    }

    #[tokio::test]
    async fn mock_transport_records_sent_message() {
        let transport = MockTransport::new();
        let data = b"OPTIONS sip:example.com SIP/2.0\r\n\r\n";

        transport.send_to(data, addr()).await.unwrap();

        assert_eq!(transport.sent_count(), 1);
        assert_eq!(transport.sent.lock().unwrap()[0], (data.to_vec(), addr()));
        assert_eq!(transport.sent_messages().len(), 1);
    }

    #[tokio::test]
    async fn mock_transport_failure_is_counted_not_recorded() {
        let transport = MockTransport::new();
        transport.set_should_fail(true);

        assert!(transport.send_to(b"data", addr()).await.is_err());
        assert_eq!(transport.send_count.load(Ordering::Relaxed), 1);
        assert_eq!(transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn mock_transport_returns_scripted_replies_in_order() {
        let transport = MockTransport::new();
        transport.push_reply(b"one", addr());
        transport.push_reply(b"two", addr());

        assert_eq!(transport.recv_from().await.unwrap().0, b"one".to_vec());
        assert_eq!(transport.recv_from().await.unwrap().0, b"two".to_vec());
        assert_eq!(transport.recv_count.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn mock_transport_recv_without_replies_never_completes() {
        let transport = MockTransport::new();
        let result = tokio::time::timeout(Duration::from_millis(20), transport.recv_from()).await;
        assert!(result.is_err());
    }

    #[test]
    fn mock_transport_implements_sip_transport() {
        let transport = Arc::new(MockTransport::new());
        let _: Arc<dyn SipTransport> = transport;
    }
}

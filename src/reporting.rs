// Read-only report queries answered by the dispatcher.
// Queries travel as messages so a reader never observes a half-applied update.
use serde::Serialize;
use std::fmt;
use tokio::sync::{mpsc, oneshot};

use crate::error::BotError;
use crate::execution::{AccountSummary, OpenPositionPnl, UnrealizedPnl};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    AccountSummary,
    NetPnl,
    OpenPositions,
    UnrealizedPnl,
}

impl ReportKind {
    pub fn command(&self) -> &'static str {
        match self {
            ReportKind::AccountSummary => "summary",
            ReportKind::NetPnl => "pnl",
            ReportKind::OpenPositions => "positions",
            ReportKind::UnrealizedPnl => "unrealized",
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ReportResponse {
    AccountSummary(AccountSummary),
    NetPnl { net_pnl: f64, pnl_pct: f64 },
    OpenPositions(Vec<OpenPositionPnl>),
    UnrealizedPnl(UnrealizedPnl),
}

#[derive(Debug)]
pub struct ReportQuery {
    pub kind: ReportKind,
    pub reply: oneshot::Sender<ReportResponse>,
}

/// Cloneable client side of the report channel
#[derive(Debug, Clone)]
pub struct ReportHandle {
    tx: mpsc::Sender<ReportQuery>,
}

impl ReportHandle {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ReportQuery>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub async fn query(&self, kind: ReportKind) -> Result<ReportResponse, BotError> {
        let (reply, response) = oneshot::channel();

        self.tx
            .send(ReportQuery { kind, reply })
            .await
            .map_err(|_| BotError::ChannelClosed("report queries"))?;

        response
            .await
            .map_err(|_| BotError::ChannelClosed("report reply"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_query_round_trip() {
        let (handle, mut rx) = ReportHandle::new(1);

        let responder = tokio::spawn(async move {
            let query = rx.recv().await.unwrap();
            assert_eq!(query.kind, ReportKind::NetPnl);
            query
                .reply
                .send(ReportResponse::NetPnl {
                    net_pnl: 20.0,
                    pnl_pct: 2.0,
                })
                .unwrap();
        });

        let response = handle.query(ReportKind::NetPnl).await.unwrap();
        assert_eq!(
            response,
            ReportResponse::NetPnl {
                net_pnl: 20.0,
                pnl_pct: 2.0
            }
        );
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_query_closed_channel() {
        let (handle, rx) = ReportHandle::new(1);
        drop(rx);
        assert!(handle.query(ReportKind::AccountSummary).await.is_err());
    }
}

use mqlink_broker::{ConfirmResponse, Consumer, Producer, TransProducer};
use std::sync::Arc;

use crate::error::{check, Result};

/// The three broker channels of one topic client. Read-only once built and
/// shared by the client, its consume loops and every handle they produce.
pub(crate) struct Channels {
    pub(crate) producer: Arc<dyn Producer>,
    pub(crate) trans_producer: Arc<dyn TransProducer>,
    pub(crate) consumer: Arc<dyn Consumer>,
}

impl Channels {
    pub(crate) async fn commit(&self, receipt_handle: &str) -> Result<ConfirmResponse> {
        check("commit", self.trans_producer.commit(receipt_handle).await)
    }

    pub(crate) async fn rollback(&self, receipt_handle: &str) -> Result<ConfirmResponse> {
        check("rollback", self.trans_producer.rollback(receipt_handle).await)
    }
}

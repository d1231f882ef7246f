//! Background tasks driving a [`WsClient`](crate::WsClient) connection.

pub(crate) mod ping;
pub(crate) mod read;
pub(crate) mod write;

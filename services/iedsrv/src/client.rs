//! Client connection
//!
//! [`IedConnection`] speaks the line protocol of [`crate::protocol`] over
//! TCP or any in-memory stream. Requests are issued one at a time; reports
//! that arrive while waiting for a response are buffered and handed out by
//! [`IedConnection::next_report`] in arrival order.

use std::collections::VecDeque;
use std::time::Duration;

use errors::{IedError, IedResult};
use futures::{SinkExt, StreamExt};
use iec61850_model::{FunctionalConstraint, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, info};

use crate::protocol::{self, Operation, Request, Response, ServerFrame};
use crate::report::{DataSet, Report, ReportTriggers, SubscriptionHandle};

/// Default time to wait for a connection or a response
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Byte stream a connection can run over
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

pub struct IedConnection {
    framed: Framed<Box<dyn Transport>, LinesCodec>,
    endpoint: String,
    next_id: u64,
    reports: VecDeque<Report>,
    timeout: Duration,
}

impl IedConnection {
    /// Connect over TCP
    pub async fn connect(host: &str, port: u16) -> IedResult<Self> {
        Self::connect_with_timeout(host, port, DEFAULT_TIMEOUT).await
    }

    pub async fn connect_with_timeout(host: &str, port: u16, timeout: Duration) -> IedResult<Self> {
        let endpoint = format!("{}:{}", host, port);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&endpoint))
            .await
            .map_err(|_| IedError::ConnectionFailed {
                endpoint: endpoint.clone(),
                reason: format!("no answer within {:?}", timeout),
            })?
            .map_err(|e| IedError::ConnectionFailed {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }
        info!("Connected to {}", endpoint);

        let mut connection = Self::from_stream(stream, endpoint);
        connection.timeout = timeout;
        Ok(connection)
    }

    /// Wrap an already connected stream
    pub fn from_stream<T: Transport + 'static>(io: T, endpoint: impl Into<String>) -> Self {
        Self {
            framed: Framed::new(Box::new(io) as Box<dyn Transport>, protocol::codec()),
            endpoint: endpoint.into(),
            next_id: 1,
            reports: VecDeque::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Response and report timeout
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub async fn read(&mut self, reference: &str, fc: FunctionalConstraint) -> IedResult<Value> {
        let response = self
            .call(
                Operation::Read {
                    reference: reference.to_string(),
                    fc,
                },
                reference,
                fc.as_str(),
            )
            .await?;
        response
            .value
            .ok_or_else(|| IedError::protocol("read response without value"))
    }

    pub async fn write(
        &mut self,
        reference: &str,
        fc: FunctionalConstraint,
        value: impl Into<Value>,
    ) -> IedResult<()> {
        self.call(
            Operation::Write {
                reference: reference.to_string(),
                fc,
                value: value.into(),
            },
            reference,
            fc.as_str(),
        )
        .await?;
        Ok(())
    }

    pub async fn subscribe(
        &mut self,
        data_set: DataSet,
        triggers: ReportTriggers,
    ) -> IedResult<SubscriptionHandle> {
        let name = data_set.name.clone();
        let response = self
            .call(Operation::Subscribe { data_set, triggers }, &name, "RP")
            .await?;
        response
            .subscription
            .ok_or_else(|| IedError::protocol("subscribe response without handle"))
    }

    pub async fn unsubscribe(&mut self, subscription: SubscriptionHandle) -> IedResult<()> {
        self.call(
            Operation::Unsubscribe { subscription },
            &subscription.to_string(),
            "RP",
        )
        .await?;
        Ok(())
    }

    /// Ask for a general interrogation report
    pub async fn interrogate(&mut self, subscription: SubscriptionHandle) -> IedResult<()> {
        self.call(
            Operation::Interrogate { subscription },
            &subscription.to_string(),
            "RP",
        )
        .await?;
        Ok(())
    }

    /// Logical device names, or the child names of `reference`
    pub async fn get_directory(&mut self, reference: Option<&str>) -> IedResult<Vec<String>> {
        let response = self
            .call(
                Operation::GetDirectory {
                    reference: reference.map(str::to_string),
                },
                reference.unwrap_or(""),
                "",
            )
            .await?;
        Ok(response.names.unwrap_or_default())
    }

    /// Next report for any subscription of this connection
    pub async fn next_report(&mut self) -> IedResult<Report> {
        if let Some(report) = self.reports.pop_front() {
            return Ok(report);
        }
        let timeout = self.timeout;
        tokio::time::timeout(timeout, self.await_report())
            .await
            .map_err(|_| IedError::Timeout("report".to_string()))?
    }

    /// Reports already received but not yet taken
    pub fn buffered_reports(&self) -> usize {
        self.reports.len()
    }

    pub async fn close(mut self) -> IedResult<()> {
        SinkExt::<String>::close(&mut self.framed)
            .await
            .map_err(protocol::codec_error)?;
        debug!("Connection to {} closed", self.endpoint);
        Ok(())
    }

    async fn call(&mut self, operation: Operation, reference: &str, fc: &str) -> IedResult<Response> {
        let id = self.next_id;
        self.next_id += 1;
        let line = protocol::encode(&Request { id, operation })?;
        if let Err(e) = self.framed.send(line).await {
            return Err(self.transport_error(e));
        }

        let timeout = self.timeout;
        let response = tokio::time::timeout(timeout, self.await_response(id))
            .await
            .map_err(|_| IedError::Timeout(format!("response to request {}", id)))??;

        match response.access_error() {
            None => Ok(response),
            Some(code) => Err(code.into_error(reference, fc)),
        }
    }

    async fn await_response(&mut self, id: u64) -> IedResult<Response> {
        loop {
            match self.next_frame().await? {
                ServerFrame::Report(report) => self.reports.push_back(report),
                ServerFrame::Response(response) if response.id == Some(id) => return Ok(response),
                ServerFrame::Response(response) => {
                    // Errors for unparseable frames carry no id
                    if let Some(code) = response.access_error().filter(|_| response.id.is_none()) {
                        return Err(code.into_error(&self.endpoint, ""));
                    }
                    debug!("Discarding response {:?} while waiting for {}", response.id, id);
                },
            }
        }
    }

    async fn await_report(&mut self) -> IedResult<Report> {
        loop {
            match self.next_frame().await? {
                ServerFrame::Report(report) => return Ok(report),
                ServerFrame::Response(response) => {
                    debug!("Unexpected response {:?} while waiting for a report", response.id);
                },
            }
        }
    }

    async fn next_frame(&mut self) -> IedResult<ServerFrame> {
        match self.framed.next().await {
            Some(Ok(line)) => protocol::decode_frame(&line),
            Some(Err(e)) => Err(self.transport_error(e)),
            None => {
                debug!("Connection to {} closed by peer", self.endpoint);
                Err(IedError::ConnectionClosing)
            },
        }
    }

    /// A broken stream means the server is tearing the association down
    fn transport_error(&self, err: LinesCodecError) -> IedError {
        match err {
            LinesCodecError::Io(e) => {
                debug!("Connection to {} lost: {}", self.endpoint, e);
                IedError::ConnectionClosing
            },
            other => protocol::codec_error(other),
        }
    }
}

//! Client sessions
//!
//! A [`Session`] executes decoded requests against the shared server state
//! and owns the sending half of its report queue. [`serve`] drives one
//! session over any byte stream: inbound frames, outbound reports and the
//! server shutdown token are multiplexed in a single `select!` loop.

use std::sync::Arc;
use std::time::Duration;

use errors::{IedError, IedErrorTrait, IedResult};
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};

use crate::protocol::{self, Operation, Request, Response, ServerFrame};
use crate::report::{report_channel, ReportReceiver, ReportSender, SessionId};
use crate::server::{ServerState, Shared};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    /// Shutdown requested; new requests are rejected
    Closing,
    Closed,
}

/// One client association
pub struct Session {
    id: SessionId,
    peer: String,
    state: SessionState,
    shared: Arc<Shared>,
    reports: ReportSender,
}

impl Session {
    pub(crate) fn open(shared: Arc<Shared>, peer: &str) -> IedResult<(Self, ReportReceiver)> {
        let id = shared.register_session(peer)?;
        let (tx, rx) = report_channel();
        let session = Self {
            id,
            peer: peer.to_string(),
            state: SessionState::Connected,
            shared,
            reports: tx,
        };
        Ok((session, rx))
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Decode and execute one inbound line
    ///
    /// Malformed input yields an error response; the session stays usable.
    pub fn handle_line(&mut self, line: &str) -> Response {
        match protocol::decode_request(line) {
            Ok(request) => self.handle_request(request),
            Err((id, err)) => {
                warn!("Session {}: malformed request: {}", self.id, err);
                Response::error(id, &err)
            },
        }
    }

    pub fn handle_request(&mut self, request: Request) -> Response {
        let id = request.id;
        let op = request.operation.name();
        match self.execute(request.operation, id) {
            Ok(response) => response,
            Err(err) => {
                match err.log_level() {
                    Level::ERROR => error!("Session {}: {} #{} failed: {}", self.id, op, id, err),
                    Level::WARN => warn!("Session {}: {} #{} failed: {}", self.id, op, id, err),
                    _ => debug!("Session {}: {} #{} failed: {}", self.id, op, id, err),
                }
                Response::error(Some(id), &err)
            },
        }
    }

    fn execute(&mut self, operation: Operation, id: u64) -> IedResult<Response> {
        if self.state != SessionState::Connected {
            return Err(IedError::ConnectionClosing);
        }

        match operation {
            Operation::Read { reference, fc } => {
                let state = self.shared.state.lock();
                let value = state.access.read(&state.model, &reference, fc)?;
                Ok(Response::with_value(id, value))
            },
            Operation::Write {
                reference,
                fc,
                value,
            } => {
                let mut state = self.shared.state.lock();
                let ServerState {
                    model,
                    reports,
                    access,
                } = &mut *state;
                access.write(model, reports, &reference, fc, value)?;
                Ok(Response::ok(id))
            },
            Operation::Subscribe { data_set, triggers } => {
                let integrity = triggers
                    .integrity_period()
                    .map(|period| self.shared.runtime().map(|runtime| (period, runtime)))
                    .transpose()?;
                let handle = {
                    let mut state = self.shared.state.lock();
                    let ServerState { model, reports, .. } = &mut *state;
                    let handle =
                        reports.subscribe(model, self.id, self.reports.clone(), &data_set, triggers)?;
                    if let Some((period, runtime)) = &integrity {
                        let token = self.shared.shutdown_token().child_token();
                        reports.set_integrity_token(handle, token.clone());
                        self.shared.spawn_integrity(runtime, handle, *period, token);
                    }
                    handle
                };
                info!(
                    "Session {} subscribed to '{}' as {}",
                    self.id, data_set.name, handle
                );
                Ok(Response::subscribed(id, handle))
            },
            Operation::Unsubscribe { subscription } => {
                self.shared
                    .state
                    .lock()
                    .reports
                    .unsubscribe(self.id, subscription)?;
                Ok(Response::ok(id))
            },
            Operation::Interrogate { subscription } => {
                let mut state = self.shared.state.lock();
                let ServerState { model, reports, .. } = &mut *state;
                reports.general_interrogation(model, self.id, subscription)?;
                Ok(Response::ok(id))
            },
            Operation::GetDirectory { reference } => {
                let state = self.shared.state.lock();
                let names = match reference {
                    None => state.model.logical_device_names(),
                    Some(reference) => {
                        let node = state.model.resolve(&reference)?;
                        state.model.child_names(node)
                    },
                };
                Ok(Response::directory(
                    id,
                    names.into_iter().map(str::to_string).collect(),
                ))
            },
        }
    }

    /// Stop accepting requests
    pub fn begin_close(&mut self) {
        if self.state == SessionState::Connected {
            debug!("Session {} closing", self.id);
            self.state = SessionState::Closing;
        }
    }

    /// Drop the session's subscriptions and leave the registry
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        let dropped = self.shared.state.lock().reports.drop_session(self.id);
        self.shared.unregister_session(self.id);
        info!(
            "Session {} ({}) closed, {} subscriptions dropped",
            self.id, self.peer, dropped
        );
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

async fn send_frame<T>(framed: &mut Framed<T, tokio_util::codec::LinesCodec>, frame: &ServerFrame) -> IedResult<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let line = protocol::encode(frame)?;
    framed.send(line).await.map_err(protocol::codec_error)
}

/// Run one session over a byte stream until the peer leaves, the idle
/// timeout expires or `shutdown` is cancelled
pub(crate) async fn serve<T>(
    io: T,
    mut session: Session,
    mut reports: ReportReceiver,
    shutdown: CancellationToken,
    idle_timeout: Option<Duration>,
) where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(io, protocol::codec());
    let idle_period = idle_timeout.unwrap_or(Duration::from_secs(86_400));
    let idle = tokio::time::sleep(idle_period);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                session.begin_close();
                break;
            }
            _ = &mut idle, if idle_timeout.is_some() => {
                info!("Session {} idle for {:?}, closing", session.id(), idle_period);
                session.begin_close();
                break;
            }
            frame = framed.next() => {
                let response = match frame {
                    Some(Ok(line)) => {
                        idle.as_mut().reset(tokio::time::Instant::now() + idle_period);
                        if line.trim().is_empty() {
                            continue;
                        }
                        session.handle_line(&line)
                    },
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        let err = protocol::codec_error(LinesCodecError::MaxLineLengthExceeded);
                        warn!("Session {}: {}", session.id(), err);
                        Response::error(None, &err)
                    },
                    Some(Err(LinesCodecError::Io(e))) => {
                        debug!("Session {} read error: {}", session.id(), e);
                        break;
                    },
                    None => {
                        debug!("Session {} closed by peer", session.id());
                        break;
                    },
                };
                if let Err(e) = send_frame(&mut framed, &ServerFrame::Response(response)).await {
                    debug!("Session {} write failed: {}", session.id(), e);
                    break;
                }
            }
            Some(report) = reports.recv() => {
                if let Err(e) = send_frame(&mut framed, &ServerFrame::Report(report)).await {
                    debug!("Session {} write failed: {}", session.id(), e);
                    break;
                }
            }
        }
    }

    if session.state() == SessionState::Closing {
        // Requests already received are answered with connection-closing
        while let Some(Some(Ok(line))) = framed.next().now_or_never() {
            if line.trim().is_empty() {
                continue;
            }
            let response = session.handle_line(&line);
            if send_frame(&mut framed, &ServerFrame::Response(response)).await.is_err() {
                break;
            }
        }
    }

    session.close();
    if let Err(e) = SinkExt::<String>::close(&mut framed).await {
        debug!("Session {} shutdown: {}", session.id(), e);
    }
}

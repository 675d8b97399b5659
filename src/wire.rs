use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::auth;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::protocol::{self, ErrorCode, ProtocolError, Request, Response};
use crate::tenant::TenantManager;

type Transport = Framed<TcpStream, LengthDelimitedCodec>;

/// Pending notification frames per connection before watchers block.
const OUTBOUND_CAPACITY: usize = 256;

/// An authenticated connection: one actor inside one organization.
struct Session {
    organization: String,
    actor: Actor,
    engine: Arc<Engine>,
    /// Forwarder task per watched hall.
    watches: HashMap<Ulid, JoinHandle<()>>,
    outbound: mpsc::Sender<Response>,
}

impl Drop for Session {
    fn drop(&mut self) {
        for (_, handle) in self.watches.drain() {
            handle.abort();
        }
    }
}

pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
) -> Result<(), ProtocolError> {
    let mut framed = Framed::new(socket, protocol::codec());
    let (outbound, mut notifications) = mpsc::channel(OUTBOUND_CAPACITY);
    let mut session = handshake(&mut framed, &tenant_manager, &password, outbound).await?;
    info!(
        organization = %session.organization,
        actor = %session.actor.id,
        role = %session.actor.role,
        "session started"
    );

    loop {
        tokio::select! {
            frame = framed.next() => {
                let Some(frame) = frame else { break };
                let frame = frame?;
                let response = match protocol::decode::<Request>(&frame) {
                    Ok(request) => session.handle(request).await,
                    Err(e) => Response::error(ErrorCode::Protocol, e.to_string()),
                };
                framed.send(protocol::encode(&response)?).await?;
            }
            Some(note) = notifications.recv() => {
                framed.send(protocol::encode(&note)?).await?;
            }
        }
    }

    debug!(actor = %session.actor.id, "session closed");
    Ok(())
}

async fn reply_and_fail(
    framed: &mut Transport,
    response: Response,
    err: ProtocolError,
) -> Result<Session, ProtocolError> {
    framed.send(protocol::encode(&response)?).await?;
    Err(err)
}

/// First frame must be a valid `hello`; anything else closes the connection.
async fn handshake(
    framed: &mut Transport,
    tenant_manager: &TenantManager,
    password: &str,
    outbound: mpsc::Sender<Response>,
) -> Result<Session, ProtocolError> {
    let frame = match framed.next().await {
        Some(frame) => frame?,
        None => return Err(ProtocolError::ConnectionClosed),
    };
    let request = match protocol::decode::<Request>(&frame) {
        Ok(request) => request,
        Err(e) => {
            let response = Response::error(ErrorCode::Protocol, e.to_string());
            return reply_and_fail(framed, response, e).await;
        }
    };
    let Request::Hello {
        organization,
        password: supplied,
        actor,
    } = request
    else {
        let response = Response::error(ErrorCode::Protocol, "expected hello as first frame");
        return reply_and_fail(framed, response, ProtocolError::HandshakeRequired).await;
    };

    if let Err(e) = auth::check_hello(password, &organization, &supplied, &actor) {
        metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
        let response = Response::error(ErrorCode::Auth, e.to_string());
        return reply_and_fail(framed, response, ProtocolError::Auth(e.to_string())).await;
    }

    let engine = match tenant_manager.get_or_create(&organization) {
        Ok(engine) => engine,
        Err(e) => {
            let response = Response::error(ErrorCode::Auth, format!("organization unavailable: {e}"));
            return reply_and_fail(framed, response, ProtocolError::Io(e)).await;
        }
    };

    let welcome = Response::Welcome {
        organization: organization.clone(),
        actor: actor.clone(),
    };
    framed.send(protocol::encode(&welcome)?).await?;

    Ok(Session {
        organization,
        actor,
        engine,
        watches: HashMap::new(),
        outbound,
    })
}

fn reply<T>(result: Result<T, EngineError>, ok: impl FnOnce(T) -> Response) -> Response {
    match result {
        Ok(value) => ok(value),
        Err(e) => {
            if let EngineError::WalError(_) = e {
                error!("engine error: {e}");
            } else {
                debug!("request refused: {e}");
            }
            Response::from_engine_error(&e)
        }
    }
}

fn span_or_error(start: Ms, end: Ms) -> Result<Span, EngineError> {
    Span::try_new(start, end).ok_or(EngineError::Validation("interval start must be before end"))
}

impl Session {
    async fn handle(&mut self, request: Request) -> Response {
        let command = observability::command_label(&request);
        let started = Instant::now();
        let response = self.dispatch(request).await;
        let status = match &response {
            Response::Error { code, .. } => code.as_str(),
            _ => "ok",
        };
        metrics::counter!(observability::REQUESTS_TOTAL, "command" => command, "status" => status)
            .increment(1);
        metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "command" => command)
            .record(started.elapsed().as_secs_f64());
        response
    }

    async fn dispatch(&mut self, request: Request) -> Response {
        let engine = &self.engine;
        let actor = &self.actor;
        match request {
            Request::Hello { .. } => Response::error(ErrorCode::Protocol, "session already established"),
            Request::RegisterHall {
                name,
                capacity,
                location,
                amenities,
            } => reply(
                engine
                    .register_hall(actor, name, capacity, location, amenities)
                    .await,
                |hall| Response::Hall { hall },
            ),
            Request::ListHalls => Response::Halls {
                halls: engine.list_halls().await,
            },
            Request::Submit {
                hall_id,
                start,
                end,
                title,
                description,
            } => {
                let result = match span_or_error(start, end) {
                    Ok(span) => engine.submit(actor, hall_id, span, title, description).await,
                    Err(e) => Err(e),
                };
                reply(result, |booking| Response::Booking { booking })
            }
            Request::Amend {
                booking_id,
                title,
                description,
            } => reply(
                engine.amend(actor, booking_id, title, description).await,
                |booking| Response::Booking { booking },
            ),
            Request::Approve {
                booking_id,
                expected_status,
            } => reply(
                engine.approve(booking_id, actor, expected_status).await,
                |booking| Response::Booking { booking },
            ),
            Request::Reject {
                booking_id,
                reason,
                expected_status,
            } => reply(
                engine.reject(booking_id, actor, reason, expected_status).await,
                |booking| Response::Booking { booking },
            ),
            Request::Get { booking_id } => reply(engine.get(booking_id, actor).await, |booking| {
                Response::Booking { booking }
            }),
            Request::List => Response::Bookings {
                bookings: engine.list_bookings(actor).await,
            },
            Request::Queue => Response::Bookings {
                bookings: engine.queue_for(actor).await,
            },
            Request::History => Response::Bookings {
                bookings: engine.history_for(actor).await,
            },
            Request::Schedule {
                hall_id,
                start,
                end,
            } => {
                let result = match span_or_error(start, end) {
                    Ok(window) => engine.schedule(hall_id, window).await,
                    Err(e) => Err(e),
                };
                reply(result, |entries| Response::Schedule { entries })
            }
            Request::Watch { hall_id } => self.watch(hall_id).await,
            Request::Unwatch { hall_id } => {
                if let Some(handle) = self.watches.remove(&hall_id) {
                    handle.abort();
                }
                Response::Ok
            }
        }
    }

    /// Forward the hall's events this actor may see to the connection until
    /// unwatched or closed.
    async fn watch(&mut self, hall_id: Ulid) -> Response {
        if self.watches.contains_key(&hall_id) {
            return Response::Ok;
        }
        let mut feed = match self.engine.watch(hall_id, &self.actor).await {
            Ok(feed) => feed,
            Err(e) => return Response::from_engine_error(&e),
        };

        let tx = self.outbound.clone();
        let handle = tokio::spawn(async move {
            loop {
                match feed.recv().await {
                    Ok(event) => {
                        if tx
                            .send(Response::Notification { hall_id, event })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(hall = %hall_id, skipped, "watcher lagged, notifications dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.watches.insert(hall_id, handle);
        Response::Ok
    }
}

//! Newline-delimited JSON front end.
//!
//! Every connection opens with a `hello` frame carrying the shared secret and
//! the caller identity the upstream session layer resolved. After that, each
//! line is one request and gets exactly one response line, in order.
//!
//! After `subscribe`, the connection also carries [`Push`] frames for every
//! change to a booking the caller is party to, interleaved between responses.

use std::io;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::auth::{AuthSource, Credentials};
use crate::engine::EngineError;
use crate::limits::MAX_FRAME_LEN;
use crate::model::*;
use crate::notify::{Notification, NotifyHub};
use crate::service::{BookingService, CreateRequest};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Hello {
        password: String,
        user: UserId,
        role: Role,
    },
    Create {
        kind: BookingKind,
        /// Property or service id, interpreted per `kind`.
        subject: Ulid,
        tenant: Option<UserId>,
        provider: Option<UserId>,
        start: Ms,
        end: Option<Ms>,
        notes: Option<String>,
    },
    Confirm {
        id: BookingId,
    },
    Reschedule {
        id: BookingId,
        start: Ms,
        end: Option<Ms>,
    },
    Cancel {
        id: BookingId,
    },
    Complete {
        id: BookingId,
    },
    UpdateNotes {
        id: BookingId,
        notes: Option<String>,
    },
    AttachPayment {
        id: BookingId,
        payment: PaymentInfo,
    },
    Get {
        id: BookingId,
    },
    /// Defaults to the authenticated user.
    ListForUser {
        user: Option<UserId>,
    },
    ListForProvider {
        provider: UserId,
    },
    /// Start receiving notifications for the authenticated user.
    Subscribe,
}

/// Flat client-facing rendering of a [`Booking`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingView {
    pub id: BookingId,
    pub kind: BookingKind,
    pub subject_property: Option<PropertyId>,
    pub subject_service: Option<ServiceId>,
    pub tenant: UserId,
    pub provider: UserId,
    pub start: Ms,
    pub end: Ms,
    pub status: BookingStatus,
    pub notes: Option<String>,
    pub payment: Option<PaymentInfo>,
    pub created_at: Ms,
    pub history: Vec<HistoryEntry>,
}

impl From<Booking> for BookingView {
    fn from(b: Booking) -> Self {
        Self {
            id: b.id,
            kind: b.kind(),
            subject_property: b.subject.property(),
            subject_service: b.subject.service(),
            tenant: b.tenant,
            provider: b.provider,
            start: b.slot.start,
            end: b.slot.end,
            status: b.status,
            notes: b.notes,
            payment: b.payment,
            created_at: b.created_at,
            history: b.history,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub field: Option<String>,
    pub message: String,
}

impl From<&EngineError> for ErrorBody {
    fn from(e: &EngineError) -> Self {
        Self {
            kind: e.kind().as_str().to_string(),
            field: e.field().map(str::to_string),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking: Option<BookingView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bookings: Option<Vec<BookingView>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// Server-initiated notification frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Push {
    pub notification: NotificationKind,
    pub booking: BookingView,
}

impl From<Notification> for Push {
    fn from(n: Notification) -> Self {
        Self {
            notification: n.kind,
            booking: n.booking.into(),
        }
    }
}

impl Response {
    fn ok() -> Self {
        Self {
            ok: true,
            booking: None,
            bookings: None,
            error: None,
        }
    }

    fn booking(b: Booking) -> Self {
        Self {
            ok: true,
            booking: Some(b.into()),
            bookings: None,
            error: None,
        }
    }

    fn bookings(list: Vec<Booking>) -> Self {
        Self {
            ok: true,
            booking: None,
            bookings: Some(list.into_iter().map(BookingView::from).collect()),
            error: None,
        }
    }

    fn error(body: ErrorBody) -> Self {
        Self {
            ok: false,
            booking: None,
            bookings: None,
            error: Some(body),
        }
    }

    fn protocol_error(kind: &str, message: impl Into<String>) -> Self {
        Self::error(ErrorBody {
            kind: kind.to_string(),
            field: Some("op".to_string()),
            message: message.into(),
        })
    }
}

impl From<Result<Booking, EngineError>> for Response {
    fn from(result: Result<Booking, EngineError>) -> Self {
        match result {
            Ok(b) => Response::booking(b),
            Err(e) => Response::error((&e).into()),
        }
    }
}

impl From<Result<Vec<Booking>, EngineError>> for Response {
    fn from(result: Result<Vec<Booking>, EngineError>) -> Self {
        match result {
            Ok(list) => Response::bookings(list),
            Err(e) => Response::error((&e).into()),
        }
    }
}

async fn execute(service: &BookingService, caller: Caller, request: Request) -> Response {
    match request {
        Request::Hello { .. } => Response::protocol_error("invalid_request", "already authenticated"),
        Request::Subscribe => Response::protocol_error("invalid_request", "subscribe needs a session"),
        Request::Create {
            kind,
            subject,
            tenant,
            provider,
            start,
            end,
            notes,
        } => {
            let req = CreateRequest {
                subject: Subject::from_kind(kind, subject),
                tenant,
                provider,
                start,
                end,
                notes,
            };
            service.create(caller, req).await.into()
        }
        Request::Confirm { id } => service.confirm(caller, id).await.into(),
        Request::Reschedule { id, start, end } => service.reschedule(caller, id, start, end).await.into(),
        Request::Cancel { id } => service.cancel(caller, id).await.into(),
        Request::Complete { id } => service.complete(caller, id).await.into(),
        Request::UpdateNotes { id, notes } => service.update_notes(caller, id, notes).await.into(),
        Request::AttachPayment { id, payment } => service.attach_payment(caller, id, payment).await.into(),
        Request::Get { id } => service.get(caller, id).await.into(),
        Request::ListForUser { user } => service
            .list_for_user(caller, user.unwrap_or(caller.user))
            .await
            .into(),
        Request::ListForProvider { provider } => service.list_for_provider(caller, provider).await.into(),
    }
}

async fn send<S, T>(framed: &mut Framed<S, LinesCodec>, frame: &T) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: Serialize,
{
    let line = serde_json::to_string(frame).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    framed.send(line).await.map_err(codec_err)
}

fn codec_err(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        LinesCodecError::MaxLineLengthExceeded => {
            io::Error::new(io::ErrorKind::InvalidData, "frame too long")
        }
    }
}

fn oversized() -> Response {
    Response::protocol_error("invalid_request", format!("frame exceeds {MAX_FRAME_LEN} bytes"))
}

/// Next frame, answering oversized lines in place. `None` on disconnect.
async fn next_line<S>(framed: &mut Framed<S, LinesCodec>) -> io::Result<Option<String>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match framed.next().await {
            None => return Ok(None),
            Some(Ok(line)) => return Ok(Some(line)),
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => send(framed, &oversized()).await?,
            Some(Err(LinesCodecError::Io(e))) => return Err(e),
        }
    }
}

/// Next notification for a subscribed session; pending forever otherwise.
async fn next_notification(
    subscription: &mut Option<broadcast::Receiver<Notification>>,
) -> Result<Notification, broadcast::error::RecvError> {
    match subscription {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Read and check the `hello` frame. `None` means the connection is refused
/// (and has already been told why) or went away.
async fn handshake<S>(framed: &mut Framed<S, LinesCodec>, auth: &dyn AuthSource) -> io::Result<Option<Caller>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Some(line) = next_line(framed).await? else {
        return Ok(None);
    };
    let credentials = match serde_json::from_str::<Request>(&line) {
        Ok(Request::Hello { password, user, role }) => Credentials { password, user, role },
        Ok(_) | Err(_) => {
            send(framed, &Response::protocol_error("forbidden", "expected hello frame")).await?;
            return Ok(None);
        }
    };
    match auth.authenticate(&credentials).await {
        Some(caller) => {
            send(framed, &Response::ok()).await?;
            Ok(Some(caller))
        }
        None => {
            metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
            warn!("authentication failed for user {}", credentials.user);
            send(framed, &Response::protocol_error("forbidden", "authentication failed")).await?;
            Ok(None)
        }
    }
}

/// Serve one client until it disconnects.
pub async fn process_connection<S>(
    socket: S,
    service: BookingService,
    hub: Arc<NotifyHub>,
    auth: Arc<dyn AuthSource>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_FRAME_LEN));
    let Some(caller) = handshake(&mut framed, auth.as_ref()).await? else {
        return Ok(());
    };
    info!("session opened for {} ({:?})", caller.user, caller.role);

    let mut subscription = None;
    let result = serve(&mut framed, &service, &hub, caller, &mut subscription).await;
    if let Some(rx) = subscription.take() {
        drop(rx);
        hub.prune(&caller.user);
    }

    info!("session closed for {}", caller.user);
    result
}

async fn serve<S>(
    framed: &mut Framed<S, LinesCodec>,
    service: &BookingService,
    hub: &NotifyHub,
    caller: Caller,
    subscription: &mut Option<broadcast::Receiver<Notification>>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            frame = framed.next() => {
                let line = match frame {
                    None => return Ok(()),
                    Some(Ok(line)) => line,
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        send(framed, &oversized()).await?;
                        continue;
                    }
                    Some(Err(LinesCodecError::Io(e))) => return Err(e),
                };
                if line.trim().is_empty() {
                    continue;
                }
                let response = match serde_json::from_str::<Request>(&line) {
                    Ok(Request::Subscribe) => {
                        if subscription.is_none() {
                            *subscription = Some(hub.subscribe(caller.user));
                            debug!("{} subscribed to notifications", caller.user);
                        }
                        Response::ok()
                    }
                    Ok(request) => execute(service, caller, request).await,
                    Err(e) => {
                        debug!("malformed request from {}: {e}", caller.user);
                        Response::protocol_error("invalid_request", e.to_string())
                    }
                };
                send(framed, &response).await?;
            }
            pushed = next_notification(subscription) => match pushed {
                Ok(notification) => send(framed, &Push::from(notification)).await?,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("{} lagged, {missed} notifications dropped", caller.user);
                    metrics::counter!(crate::observability::NOTIFICATIONS_DROPPED_TOTAL).increment(missed);
                }
                Err(broadcast::error::RecvError::Closed) => *subscription = None,
            },
        }
    }
}

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use ulid::Ulid;

use hallbook::model::*;
use hallbook::protocol::{self, ErrorCode, Request, Response};
use hallbook::tenant::TenantManager;
use hallbook::wire;

const PASSWORD: &str = "hallbook";
const TIMEOUT: Duration = Duration::from_secs(5);

/// 2027-01-15T00:00:00Z
const DAY0: Ms = 1_800_000_000_000 - (1_800_000_000_000 % 86_400_000);
const H: Ms = 3_600_000;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("hallbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, 1000));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, PASSWORD.to_string()).await;
            });
        }
    });

    addr
}

struct Client {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    notifications: VecDeque<Response>,
}

impl Client {
    async fn open(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            framed: Framed::new(stream, protocol::codec()),
            notifications: VecDeque::new(),
        }
    }

    async fn send(&mut self, request: &Request) {
        self.framed
            .send(protocol::encode(request).unwrap())
            .await
            .unwrap();
    }

    /// Next frame, or None once the server has closed the connection.
    async fn recv(&mut self) -> Option<Response> {
        let frame = tokio::time::timeout(TIMEOUT, self.framed.next())
            .await
            .expect("timed out waiting for a frame")?;
        let frame = frame.ok()?;
        Some(protocol::decode(&frame).unwrap())
    }

    /// Send a request and return its response, setting notifications aside.
    async fn call(&mut self, request: Request) -> Response {
        self.send(&request).await;
        loop {
            match self.recv().await.expect("connection closed") {
                note @ Response::Notification { .. } => self.notifications.push_back(note),
                response => return response,
            }
        }
    }

    async fn next_notification(&mut self) -> Response {
        if let Some(note) = self.notifications.pop_front() {
            return note;
        }
        self.recv().await.expect("connection closed")
    }
}

async fn login(addr: SocketAddr, organization: &str, actor: Actor) -> Client {
    let mut client = Client::open(addr).await;
    let welcome = client
        .call(Request::Hello {
            organization: organization.into(),
            password: PASSWORD.into(),
            actor: actor.clone(),
        })
        .await;
    assert_eq!(
        welcome,
        Response::Welcome {
            organization: organization.into(),
            actor,
        }
    );
    client
}

fn booking_of(response: Response) -> Booking {
    match response {
        Response::Booking { booking } => booking,
        other => panic!("expected booking, got {other:?}"),
    }
}

fn error_code(response: &Response) -> Option<ErrorCode> {
    match response {
        Response::Error { code, .. } => Some(*code),
        _ => None,
    }
}

async fn register_hall(admin: &mut Client, name: &str) -> Hall {
    match admin
        .call(Request::RegisterHall {
            name: name.into(),
            capacity: 120,
            location: "Block B".into(),
            amenities: vec!["Projector".into()],
        })
        .await
    {
        Response::Hall { hall } => hall,
        other => panic!("expected hall, got {other:?}"),
    }
}

fn submit(hall_id: Ulid, start_hour: Ms, end_hour: Ms) -> Request {
    Request::Submit {
        hall_id,
        start: DAY0 + start_hour * H,
        end: DAY0 + end_hour * H,
        title: "Department seminar".into(),
        description: "Monthly talk".into(),
    }
}

fn approve(booking_id: Ulid) -> Request {
    Request::Approve {
        booking_id,
        expected_status: None,
    }
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn full_approval_chain() {
    let addr = start_test_server().await;
    let mut admin = login(addr, "college", Actor::new("ada", Role::Admin)).await;
    let mut rita = login(addr, "college", Actor::new("rita", Role::Requester)).await;
    let mut fay = login(addr, "college", Actor::new("fay", Role::Faculty)).await;
    let mut hugo = login(addr, "college", Actor::new("hugo", Role::Hod)).await;

    let hall = register_hall(&mut admin, "Main Auditorium").await;
    let booking = booking_of(rita.call(submit(hall.id, 10, 11)).await);
    assert_eq!(booking.status, Status::PendingFaculty);

    match fay.call(Request::Queue).await {
        Response::Bookings { bookings } => {
            assert_eq!(bookings.len(), 1);
            assert_eq!(bookings[0].id, booking.id);
        }
        other => panic!("expected bookings, got {other:?}"),
    }

    let b = booking_of(fay.call(approve(booking.id)).await);
    assert_eq!(b.status, Status::PendingHod);
    let b = booking_of(
        hugo.call(Request::Approve {
            booking_id: booking.id,
            expected_status: Some(Status::PendingHod),
        })
        .await,
    );
    assert_eq!(b.status, Status::PendingAdmin);
    let b = booking_of(admin.call(approve(booking.id)).await);
    assert_eq!(b.status, Status::Confirmed);

    let b = booking_of(
        rita.call(Request::Get {
            booking_id: booking.id,
        })
        .await,
    );
    assert_eq!(
        b.approvals,
        [Some("fay".into()), Some("hugo".into()), Some("ada".into())]
    );

    match fay.call(Request::History).await {
        Response::Bookings { bookings } => assert_eq!(bookings.len(), 1),
        other => panic!("expected bookings, got {other:?}"),
    }
    match admin
        .call(Request::Schedule {
            hall_id: hall.id,
            start: DAY0,
            end: DAY0 + 24 * H,
        })
        .await
    {
        Response::Schedule { entries } => {
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].status, Status::Confirmed);
        }
        other => panic!("expected schedule, got {other:?}"),
    }
}

#[tokio::test]
async fn engine_errors_map_to_codes() {
    let addr = start_test_server().await;
    let mut admin = login(addr, "college", Actor::new("ada", Role::Admin)).await;
    let mut rita = login(addr, "college", Actor::new("rita", Role::Requester)).await;
    let mut fay = login(addr, "college", Actor::new("fay", Role::Faculty)).await;

    let hall = register_hall(&mut admin, "Seminar Room").await;
    let booking = booking_of(rita.call(submit(hall.id, 9, 10)).await);

    let overlap = rita.call(submit(hall.id, 9, 11)).await;
    assert_eq!(error_code(&overlap), Some(ErrorCode::Conflict));

    let inverted = rita.call(submit(hall.id, 12, 12)).await;
    assert_eq!(error_code(&inverted), Some(ErrorCode::Validation));

    let wrong_role = admin.call(approve(booking.id)).await;
    assert_eq!(error_code(&wrong_role), Some(ErrorCode::Unauthorized));

    let own = rita.call(approve(booking.id)).await;
    assert_eq!(error_code(&own), Some(ErrorCode::Unauthorized));

    booking_of(fay.call(approve(booking.id)).await);
    let double = fay.call(approve(booking.id)).await;
    assert_eq!(error_code(&double), Some(ErrorCode::InvalidState));

    let other = booking_of(rita.call(submit(hall.id, 14, 15)).await);
    let no_reason = fay
        .call(Request::Reject {
            booking_id: other.id,
            reason: String::new(),
            expected_status: None,
        })
        .await;
    assert_eq!(error_code(&no_reason), Some(ErrorCode::Validation));

    let missing = rita
        .call(Request::Get {
            booking_id: Ulid::new(),
        })
        .await;
    assert_eq!(error_code(&missing), Some(ErrorCode::NotFound));

    let duplicate = admin
        .call(Request::RegisterHall {
            name: "Seminar Room".into(),
            capacity: 10,
            location: String::new(),
            amenities: vec![],
        })
        .await;
    assert_eq!(error_code(&duplicate), Some(ErrorCode::AlreadyExists));
}

#[tokio::test]
async fn bad_password_is_refused() {
    let addr = start_test_server().await;
    let mut client = Client::open(addr).await;

    let response = client
        .call(Request::Hello {
            organization: "college".into(),
            password: "wrong".into(),
            actor: Actor::new("rita", Role::Requester),
        })
        .await;
    assert_eq!(error_code(&response), Some(ErrorCode::Auth));
    assert!(client.recv().await.is_none());
}

#[tokio::test]
async fn first_frame_must_be_hello() {
    let addr = start_test_server().await;
    let mut client = Client::open(addr).await;

    let response = client.call(Request::ListHalls).await;
    assert_eq!(error_code(&response), Some(ErrorCode::Protocol));
    assert!(client.recv().await.is_none());
}

#[tokio::test]
async fn malformed_frame_keeps_session_open() {
    let addr = start_test_server().await;
    let mut admin = login(addr, "college", Actor::new("ada", Role::Admin)).await;

    admin
        .framed
        .send(Bytes::from_static(b"{\"op\":\"book_everything\"}"))
        .await
        .unwrap();
    let response = admin.recv().await.unwrap();
    assert_eq!(error_code(&response), Some(ErrorCode::Protocol));

    let again = admin
        .call(Request::Hello {
            organization: "college".into(),
            password: PASSWORD.into(),
            actor: Actor::new("ada", Role::Admin),
        })
        .await;
    assert_eq!(error_code(&again), Some(ErrorCode::Protocol));

    assert_eq!(
        admin.call(Request::ListHalls).await,
        Response::Halls { halls: vec![] }
    );
}

#[tokio::test]
async fn watch_delivers_hall_events() {
    let addr = start_test_server().await;
    let mut admin = login(addr, "college", Actor::new("ada", Role::Admin)).await;
    let mut rita = login(addr, "college", Actor::new("rita", Role::Requester)).await;
    let mut fay = login(addr, "college", Actor::new("fay", Role::Faculty)).await;

    let hall = register_hall(&mut admin, "Main Auditorium").await;
    assert_eq!(fay.call(Request::Watch { hall_id: hall.id }).await, Response::Ok);

    let unknown = fay.call(Request::Watch { hall_id: Ulid::new() }).await;
    assert_eq!(error_code(&unknown), Some(ErrorCode::NotFound));

    let booking = booking_of(rita.call(submit(hall.id, 14, 15)).await);

    match fay.next_notification().await {
        Response::Notification { hall_id, event } => {
            assert_eq!(hall_id, hall.id);
            assert!(matches!(event, Event::BookingSubmitted { id, .. } if id == booking.id));
        }
        other => panic!("expected notification, got {other:?}"),
    }

    assert_eq!(fay.call(Request::Unwatch { hall_id: hall.id }).await, Response::Ok);
    booking_of(fay.call(approve(booking.id)).await);
    // The approval's own event is not forwarded after unwatch.
    assert!(fay.notifications.is_empty());
    assert_eq!(fay.call(Request::ListHalls).await, Response::Halls { halls: vec![hall] });
    assert!(fay.notifications.is_empty());
}

#[tokio::test]
async fn requester_watch_hides_other_requesters_bookings() {
    let addr = start_test_server().await;
    let mut admin = login(addr, "college", Actor::new("ada", Role::Admin)).await;
    let mut rita = login(addr, "college", Actor::new("rita", Role::Requester)).await;
    let mut ravi = login(addr, "college", Actor::new("ravi", Role::Requester)).await;
    let mut fay = login(addr, "college", Actor::new("fay", Role::Faculty)).await;

    let hall = register_hall(&mut admin, "Main Auditorium").await;
    let earlier = booking_of(ravi.call(submit(hall.id, 8, 9)).await);
    assert_eq!(ravi.call(Request::Watch { hall_id: hall.id }).await, Response::Ok);

    let theirs = booking_of(rita.call(submit(hall.id, 10, 11)).await);
    let hidden = ravi
        .call(Request::Get {
            booking_id: theirs.id,
        })
        .await;
    assert_eq!(error_code(&hidden), Some(ErrorCode::NotFound));
    booking_of(fay.call(approve(theirs.id)).await);

    // The first event ravi sees is about his own booking, submitted before the watch.
    booking_of(fay.call(approve(earlier.id)).await);
    match ravi.next_notification().await {
        Response::Notification { event, .. } => {
            assert!(
                matches!(event, Event::BookingApproved { id, .. } if id == earlier.id),
                "unexpected event {event:?}"
            );
        }
        other => panic!("expected notification, got {other:?}"),
    }

    let mine = booking_of(ravi.call(submit(hall.id, 12, 13)).await);
    match ravi.next_notification().await {
        Response::Notification { event, .. } => {
            assert!(
                matches!(event, Event::BookingSubmitted { id, ref requester_id, .. }
                    if id == mine.id && requester_id == "ravi"),
                "unexpected event {event:?}"
            );
        }
        other => panic!("expected notification, got {other:?}"),
    }
    assert!(ravi.notifications.is_empty());
}

#[tokio::test]
async fn organizations_are_isolated() {
    let addr = start_test_server().await;
    let mut admin_a = login(addr, "college_a", Actor::new("ada", Role::Admin)).await;
    let mut admin_b = login(addr, "college_b", Actor::new("ada", Role::Admin)).await;

    register_hall(&mut admin_a, "Main Auditorium").await;
    assert_eq!(
        admin_b.call(Request::ListHalls).await,
        Response::Halls { halls: vec![] }
    );
}

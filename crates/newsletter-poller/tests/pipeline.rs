use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use mockito::{Server, ServerGuard};
use newsletter_poller::config::Config;
use newsletter_poller::error::PipelineError;
use newsletter_poller::ocr::OcrEngine;
use newsletter_poller::pipeline::Pipeline;
use newsletter_poller::publisher::MemoryPublisher;
use shared_types::{EmailMessage, FailureKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];
const SUFFIX: &str = " (זמן מדויק של האירוע בזימון)";

/// Returns canned text and counts calls
struct FakeOcr {
    reply: Result<String, String>,
    calls: AtomicUsize,
}

impl FakeOcr {
    fn text(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(text.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(reason.to_string()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl OcrEngine for FakeOcr {
    async fn recognize(&self, _image: &[u8]) -> Result<String, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply.clone().map_err(PipelineError::Ocr)
    }
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn config() -> Config {
    Config::from_toml(r#"inbox_dir = "/nonexistent""#).unwrap()
}

fn pipeline(config: Config, ocr: Arc<dyn OcrEngine>, publisher: MemoryPublisher) -> Pipeline<MemoryPublisher> {
    let settings = config.settings().unwrap();
    Pipeline::new(&config, settings, ocr, publisher).unwrap()
}

fn newsletter(id: &str, from: &str, body_text: &str, body_html: Option<String>) -> EmailMessage {
    EmailMessage {
        id: id.to_string(),
        subject: "הניוזלטר השבועי".to_string(),
        from: from.to_string(),
        received_at: None,
        body_text: body_text.to_string(),
        body_html,
    }
}

const ONE_EVENT: &str = "שלום לכולן,\n\nביום שני, ה7/7, הוועדה לקידום מעמד האישה תקיים דיון בנושא \"כותרת\" בכנסת. פרטים בהזמנה.\n\n==============================\nThis email was sent to you";

fn invitation_html(url: &str) -> Option<String> {
    Some(format!(
        r#"<html><body><p>ביום שני, ה7/7, דיון. פרטים <a href="{}">בהזמנה</a>.</p></body></html>"#,
        url
    ))
}

async fn image_server() -> ServerGuard {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/track/1")
        .with_status(302)
        .with_header("location", &format!("{}/invites/7-7.png", server.url()))
        .create_async()
        .await;
    server
        .mock("GET", "/invites/7-7.png")
        .with_status(200)
        .with_header("content-type", "image/png")
        .with_body(PNG)
        .create_async()
        .await;
    server
}

#[tokio::test]
async fn test_invitation_image_time_is_verified() {
    let server = image_server().await;
    let ocr = FakeOcr::text("הזמנה לדיון\n18:00 - 20:30\nבכנסת");
    let p = pipeline(config(), ocr.clone(), MemoryPublisher::new());

    let message = newsletter(
        "1",
        "news@example.org",
        ONE_EVENT,
        invitation_html(&format!("{}/track/1", server.url())),
    );
    let summary = p.run_at(vec![message], today()).await;

    assert_eq!(summary.messages_processed, 1);
    assert_eq!(summary.blocks_found, 1);
    assert_eq!(summary.events_created, 1);
    assert!(summary.failures.is_empty(), "{:?}", summary.failures);
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);

    let published = p.publisher().published();
    let event = &published[0];
    assert_eq!(event.date, NaiveDate::from_ymd_opt(2025, 7, 7).unwrap());
    assert_eq!(event.start_time, hm(18, 0));
    assert_eq!(event.duration_minutes, 150);
    assert!(event.time_verified);
    assert_eq!(event.title, format!("כותרת{}", SUFFIX));
    assert_eq!(event.location, "ירושלים");
    assert_eq!(
        event.invitation_url.as_deref(),
        Some(format!("{}/track/1", server.url()).as_str())
    );
}

#[tokio::test]
async fn test_event_without_link_keeps_defaults() {
    let ocr = FakeOcr::text("19:30");
    let p = pipeline(config(), ocr.clone(), MemoryPublisher::new());

    let summary = p
        .run_at(vec![newsletter("1", "news@example.org", ONE_EVENT, None)], today())
        .await;

    assert_eq!(summary.events_created, 1);
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);

    let event = &p.publisher().published()[0];
    assert_eq!(event.start_time, hm(19, 0));
    assert_eq!(event.duration_minutes, 120);
    assert!(!event.time_verified);
}

#[tokio::test]
async fn test_broken_link_falls_back_to_defaults() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/track/1")
        .with_status(404)
        .create_async()
        .await;

    let p = pipeline(config(), FakeOcr::text("18:00"), MemoryPublisher::new());
    let message = newsletter(
        "1",
        "news@example.org",
        ONE_EVENT,
        invitation_html(&format!("{}/track/1", server.url())),
    );
    let summary = p.run_at(vec![message], today()).await;

    assert_eq!(summary.events_created, 1);
    assert_eq!(summary.failure_count(FailureKind::LinkResolutionFailed), 1);

    let event = &p.publisher().published()[0];
    assert_eq!(event.start_time, hm(19, 0));
    assert!(!event.time_verified);
}

#[tokio::test]
async fn test_ocr_and_parse_failures_are_counted() {
    let server = image_server().await;
    let link = invitation_html(&format!("{}/track/1", server.url()));

    let failing = pipeline(config(), FakeOcr::failing("quota exceeded"), MemoryPublisher::new());
    let summary = failing
        .run_at(vec![newsletter("1", "news@example.org", ONE_EVENT, link.clone())], today())
        .await;
    assert_eq!(summary.failure_count(FailureKind::OcrFailed), 1);
    assert_eq!(summary.events_created, 1);

    let timeless = pipeline(config(), FakeOcr::text("הזמנה ללא שעה"), MemoryPublisher::new());
    let summary = timeless
        .run_at(vec![newsletter("1", "news@example.org", ONE_EVENT, link)], today())
        .await;
    assert_eq!(summary.failure_count(FailureKind::TimeParseFailed), 1);
    assert!(!timeless.publisher().published()[0].time_verified);
}

#[tokio::test]
async fn test_exhausted_budget_abandons_link_work() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hang = tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
    });

    let mut config = config();
    config.run_budget_secs = 0;
    let p = pipeline(config, FakeOcr::text("18:00"), MemoryPublisher::new());

    let message = newsletter(
        "1",
        "news@example.org",
        ONE_EVENT,
        invitation_html(&format!("http://{}/slow", addr)),
    );
    let summary = tokio::time::timeout(Duration::from_secs(5), p.run_at(vec![message], today()))
        .await
        .expect("run must not wait for the hanging link");

    assert_eq!(summary.failure_count(FailureKind::BudgetExceeded), 1);
    assert_eq!(summary.events_created, 1);
    assert_eq!(p.publisher().published()[0].start_time, hm(19, 0));
    hang.abort();
}

#[tokio::test]
async fn test_duplicates_are_skipped_within_and_across_runs() {
    let date = NaiveDate::from_ymd_opt(2025, 7, 7).unwrap();
    let existing = MemoryPublisher::new().with_existing(date, "ערב עיון על שוויון מגדרי");
    let p = pipeline(config(), FakeOcr::text(""), existing);

    let body = "ביום שני, ה7/7, מפגש בנושא \"ערב עיון על שוויון מגדרי\" בחיפה.\n\
                ביום שני, ה7/7, דיון בנושא \"פאנל על זכויות\" בתל אביב.\n\
                ביום שני, ה7/7, תזכורת: דיון בנושא \"פאנל על זכויות\" בתל אביב.\n\
                ביום שלישי, ה8/7, דיון בנושא \"פאנל על זכויות\" בתל אביב.";
    let summary = p
        .run_at(vec![newsletter("1", "news@example.org", body, None)], today())
        .await;

    assert_eq!(summary.blocks_found, 4);
    assert_eq!(summary.events_created, 2);
    assert_eq!(summary.events_skipped, 2);
    assert_eq!(summary.failure_count(FailureKind::DuplicateSkipped), 2);

    let published = p.publisher().published();
    assert_eq!(published[0].date, date);
    assert!(published[0].title.starts_with("פאנל על זכויות"));
    assert_eq!(published[1].date, NaiveDate::from_ymd_opt(2025, 7, 8).unwrap());
}

#[tokio::test]
async fn test_sender_filter_and_message_cap() {
    let mut config = config();
    config.sender_allow_list = vec!["news@example.org".to_string()];
    config.max_messages_per_run = 2;
    let p = pipeline(config, FakeOcr::text(""), MemoryPublisher::new());

    let messages = vec![
        newsletter("spam", "promo@shop.example", ONE_EVENT, None),
        newsletter("1", "Weekly <NEWS@example.org>", ONE_EVENT, None),
        newsletter("2", "news@example.org", "ביום רביעי, ה9/7, הרצאה בנושא \"נשים במדע\" בחיפה.", None),
        newsletter("3", "news@example.org", "ביום חמישי, ה10/7, מפגש בנושא \"מעגל\" בזום.", None),
    ];
    let summary = p.run_at(messages, today()).await;

    assert_eq!(summary.messages_processed, 2);
    assert_eq!(summary.events_created, 2);
    let titles: Vec<String> = p.publisher().published().into_iter().map(|e| e.title).collect();
    assert!(titles[0].starts_with("כותרת"));
    assert!(titles[1].starts_with("נשים במדע"));
}

#[tokio::test]
async fn test_summary_serializes_for_reporting() {
    let p = pipeline(config(), FakeOcr::text(""), MemoryPublisher::new());
    let body = "ביום שני, ה7/7, דיון בנושא \"כותרת\".\nביום שלישי 8/7 הרצאה ללא אות מובילה";
    let summary = p
        .run_at(vec![newsletter("1", "news@example.org", body, None)], today())
        .await;

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["messages_processed"], 1);
    assert_eq!(json["events_created"], 1);
    assert_eq!(json["failures"]["block_rejected"], 1);
}

#[tokio::test]
async fn test_each_block_gets_its_own_invitation() {
    let server = image_server().await;
    let base = server.url();
    let html = format!(
        r#"<html><body>
          <p>לעדכונים שוטפים הצטרפו <a href="{base}/join">בלינק</a></p>
          <p>ביום שני, ה7/7, כנס. להרשמה <a href="{base}/register">בלינק</a> ופרטים <a href="{base}/track/1">בהזמנה</a>.</p>
          <p>ביום שלישי, ה8/7, הרצאה. פרטים <a href="{base}/track/2">בהזמנה</a>.</p>
        </body></html>"#
    );
    let body = "לעדכונים שוטפים הצטרפו בלינק\n\
                ביום שני, ה7/7, כנס בנושא \"מנהיגות נשית\". להרשמה בלינק ופרטים בהזמנה.\n\
                ביום שלישי, ה8/7, הרצאה בנושא \"היסטוריה של זכויות\". פרטים בהזמנה.";

    let ocr = FakeOcr::text("18:00 - 20:30");
    let p = pipeline(config(), ocr.clone(), MemoryPublisher::new());
    let summary = p
        .run_at(vec![newsletter("1", "news@example.org", body, Some(html))], today())
        .await;

    assert_eq!(summary.events_created, 2);
    // /track/2 is not mocked
    assert_eq!(summary.failure_count(FailureKind::LinkResolutionFailed), 1);
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);

    let published = p.publisher().published();
    assert_eq!(published[0].invitation_url, Some(format!("{base}/track/1")));
    assert!(published[0].time_verified);
    assert_eq!(published[1].invitation_url, Some(format!("{base}/track/2")));
    assert!(!published[1].time_verified);
}

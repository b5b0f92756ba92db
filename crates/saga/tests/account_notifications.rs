//! Account events travel through the outbox to the notification service.

use std::sync::Arc;
use std::time::Duration;

use bus::InMemoryBus;
use chrono::Utc;
use outbox::{InMemoryOutboxStore, OutboxConfig, OutboxPublisher, OutboxStore};
use saga::participants::notification::{ACTIVATION_SUBJECT, RESET_PASSWORD_SUBJECT};
use saga::{AccountService, MailKind, NotificationService, RecordingMailer, serve_notifications};

struct Harness {
    bus: Arc<InMemoryBus>,
    outbox: Arc<InMemoryOutboxStore>,
    accounts: AccountService,
    mailer: RecordingMailer,
    publisher: OutboxPublisher<InMemoryOutboxStore>,
}

async fn harness() -> Harness {
    let bus = Arc::new(InMemoryBus::new());
    let outbox = Arc::new(InMemoryOutboxStore::new());
    let mailer = RecordingMailer::new();
    let notifications = Arc::new(NotificationService::new(mailer.clone(), "https://shop.test/"));
    serve_notifications(bus.clone(), notifications).await.unwrap();

    Harness {
        accounts: AccountService::new(outbox.as_ref().clone()),
        publisher: OutboxPublisher::new(outbox.clone(), bus.clone(), OutboxConfig::default()),
        bus,
        outbox,
        mailer,
    }
}

async fn wait_for_mail(mailer: &RecordingMailer, count: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while mailer.sent().len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn registration_mail_is_sent_after_sweep() {
    let shop = harness().await;
    let event = shop.accounts.register("ann@shop.test", Utc::now()).unwrap();

    // Nothing leaves before the sweeper runs.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(shop.mailer.sent().is_empty());

    let report = shop.publisher.sweep_once().await.unwrap();
    assert_eq!(report.published, 1);

    wait_for_mail(&shop.mailer, 1).await;
    let mail = &shop.mailer.sent()[0];
    assert_eq!(mail.kind, MailKind::Activation);
    assert_eq!(mail.to, "ann@shop.test");
    assert_eq!(mail.subject, ACTIVATION_SUBJECT);
    assert!(
        mail.body
            .contains(&format!("https://shop.test/activate/{}", event.activation_code))
    );
    assert_eq!(shop.outbox.unsent_count().await.unwrap(), 0);
}

#[tokio::test]
async fn reset_mail_survives_a_bus_outage() {
    let shop = harness().await;
    let now = Utc::now();
    let registered = shop.accounts.register("bob@shop.test", now).unwrap();
    shop.accounts
        .activate(&registered.activation_code, now)
        .unwrap();
    shop.publisher.sweep_once().await.unwrap();
    wait_for_mail(&shop.mailer, 1).await;

    shop.bus.fail_topic(bus::topics::USER_PASSWORD_RESET_EVENTS);
    let reset = shop
        .accounts
        .request_password_reset("bob@shop.test", now)
        .unwrap();
    let report = shop.publisher.sweep_once().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(shop.outbox.unsent_count().await.unwrap(), 1);

    shop.bus.heal_topic(bus::topics::USER_PASSWORD_RESET_EVENTS);
    shop.publisher.sweep_once().await.unwrap();

    wait_for_mail(&shop.mailer, 2).await;
    let mail = &shop.mailer.sent()[1];
    assert_eq!(mail.kind, MailKind::PasswordReset);
    assert_eq!(mail.subject, RESET_PASSWORD_SUBJECT);
    assert!(mail.body.contains(&reset.activation_code));
}

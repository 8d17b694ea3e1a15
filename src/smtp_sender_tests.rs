use crate::error::MailError;
use crate::smtp_sender::{
    MockSmtpConnector, MockSmtpSession, SessionRejected, SmtpConfig, SmtpSender,
};
use crate::traits::{Attachment, Email, MailTransport};
use mockall::Sequence;
use mockall::predicate::eq;
use std::sync::{Arc, Mutex};

fn test_smtp_config() -> SmtpConfig {
    SmtpConfig {
        host: "smtp.test.com".to_string(),
        port: 465,
        username: "sender@test.com".to_string(),
        password: "pass".to_string(),
        use_tls: true,
    }
}

fn test_email() -> Email {
    Email {
        to: vec!["a@x.com".to_string()],
        cc: vec!["b@x.com".to_string()],
        bcc: vec!["c@x.com".to_string()],
        subject: "Hello".to_string(),
        body: "Hi".to_string(),
        ..Default::default()
    }
}

/// Session that accepts everything and records each command.
fn recording_session(log: Arc<Mutex<Vec<String>>>) -> MockSmtpSession {
    let mut session = MockSmtpSession::new();
    session.expect_can_starttls().return_const(true);

    let l = log.clone();
    session.expect_starttls().returning(move |host| {
        l.lock().unwrap().push(format!("STARTTLS {}", host));
        Ok(())
    });
    let l = log.clone();
    session.expect_authenticate().returning(move |user, _| {
        l.lock().unwrap().push(format!("AUTH {}", user));
        Ok(())
    });
    let l = log.clone();
    session.expect_mail_from().returning(move |from| {
        l.lock().unwrap().push(format!("MAIL FROM {}", from));
        Ok(())
    });
    let l = log.clone();
    session.expect_rcpt_to().returning(move |rcpt| {
        l.lock().unwrap().push(format!("RCPT TO {}", rcpt));
        Ok(())
    });
    let l = log.clone();
    session.expect_data().returning(move |message| {
        let text = String::from_utf8_lossy(message).to_string();
        l.lock().unwrap().push(format!("DATA {}", text.len()));
        assert!(!text.contains("Bcc"));
        Ok(())
    });
    session.expect_quit().returning(move || {
        log.lock().unwrap().push("QUIT".to_string());
        Ok(())
    });
    session
}

#[tokio::test]
async fn test_send_email_over_direct_tls() {
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut connector = MockSmtpConnector::new();
    let l = log.clone();
    connector
        .expect_connect_tls()
        .with(eq("smtp.test.com"), eq(465u16))
        .times(1)
        .returning(move |_, _| Ok(Box::new(recording_session(l.clone()))));
    connector.expect_connect_plain().never();

    let sender = SmtpSender::new_with_connector("me@test.com", test_smtp_config(), Arc::new(connector));
    sender.send(&test_email()).await.unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log[0], "AUTH sender@test.com");
    assert_eq!(log[1], "MAIL FROM me@test.com");
    assert_eq!(&log[2..5], &["RCPT TO a@x.com", "RCPT TO b@x.com", "RCPT TO c@x.com"]);
    assert!(log[5].starts_with("DATA "));
    assert_eq!(log[6], "QUIT");
    assert!(!log.iter().any(|c| c.starts_with("STARTTLS")));
}

#[tokio::test]
async fn test_tls_failure_falls_back_to_starttls() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut seq = Sequence::new();

    let mut connector = MockSmtpConnector::new();
    connector
        .expect_connect_tls()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Err(anyhow::anyhow!("tls handshake eof")));
    let l = log.clone();
    connector
        .expect_connect_plain()
        .with(eq("smtp.test.com"), eq(465u16))
        .times(1)
        .in_sequence(&mut seq)
        .returning(move |_, _| Ok(Box::new(recording_session(l.clone()))));

    let sender = SmtpSender::new_with_connector("me@test.com", test_smtp_config(), Arc::new(connector));
    sender.send(&test_email()).await.unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log[0], "STARTTLS smtp.test.com");
    assert_eq!(log[1], "AUTH sender@test.com");
}

#[tokio::test]
async fn test_fallback_connect_failure_reports_connect_stage() {
    let mut connector = MockSmtpConnector::new();
    connector
        .expect_connect_tls()
        .returning(|_, _| Err(anyhow::anyhow!("refused")));
    connector
        .expect_connect_plain()
        .returning(|_, _| Err(anyhow::anyhow!("connection refused")));

    let sender = SmtpSender::new_with_connector("me@test.com", test_smtp_config(), Arc::new(connector));
    let err = sender.send(&test_email()).await.unwrap_err();
    assert_eq!(err.stage(), Some("connect"));
    assert!(err.to_string().contains("smtp.test.com:465"));
}

#[tokio::test]
async fn test_starttls_rejection_is_reported() {
    let mut connector = MockSmtpConnector::new();
    connector
        .expect_connect_tls()
        .returning(|_, _| Err(anyhow::anyhow!("wrong version number")));
    connector.expect_connect_plain().returning(|_, _| {
        let mut session = MockSmtpSession::new();
        session.expect_can_starttls().return_const(false);
        session
            .expect_starttls()
            .returning(|_| Err(anyhow::anyhow!("STARTTLS not supported")));
        session.expect_authenticate().never();
        Ok(Box::new(session))
    });

    let sender = SmtpSender::new_with_connector("me@test.com", test_smtp_config(), Arc::new(connector));
    let err = sender.send(&test_email()).await.unwrap_err();
    assert_eq!(err.stage(), Some("starttls"));
}

#[tokio::test]
async fn test_auth_failure_stops_the_conversation() {
    let mut connector = MockSmtpConnector::new();
    connector.expect_connect_tls().returning(|_, _| {
        let mut session = MockSmtpSession::new();
        session
            .expect_authenticate()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("535 authentication failed")));
        session.expect_mail_from().never();
        session.expect_rcpt_to().never();
        session.expect_data().never();
        Ok(Box::new(session))
    });

    let sender = SmtpSender::new_with_connector("me@test.com", test_smtp_config(), Arc::new(connector));
    let err = sender.send(&test_email()).await.unwrap_err();
    assert!(matches!(err, MailError::Auth { .. }));
    assert!(err.to_string().contains("535"));
}

#[tokio::test]
async fn test_recipient_rejection_aborts_send() {
    let mut connector = MockSmtpConnector::new();
    connector.expect_connect_tls().returning(|_, _| {
        let mut session = MockSmtpSession::new();
        session.expect_authenticate().returning(|_, _| Ok(()));
        session.expect_mail_from().returning(|_| Ok(()));
        session.expect_rcpt_to().with(eq("a@x.com")).returning(|_| Ok(()));
        session
            .expect_rcpt_to()
            .with(eq("b@x.com"))
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("550 mailbox unavailable")));
        session.expect_data().never();
        Ok(Box::new(session))
    });

    let sender = SmtpSender::new_with_connector("me@test.com", test_smtp_config(), Arc::new(connector));
    let err = sender.send(&test_email()).await.unwrap_err();
    assert_eq!(err.stage(), Some("rcpt to"));
    assert!(err.to_string().contains("b@x.com"));
}

#[tokio::test]
async fn test_no_credentials_skips_auth() {
    let config = SmtpConfig {
        username: String::new(),
        password: String::new(),
        ..test_smtp_config()
    };

    let mut connector = MockSmtpConnector::new();
    connector.expect_connect_tls().returning(|_, _| {
        let mut session = MockSmtpSession::new();
        session.expect_authenticate().never();
        session.expect_mail_from().returning(|_| Ok(()));
        session.expect_rcpt_to().times(3).returning(|_| Ok(()));
        session.expect_data().returning(|_| Ok(()));
        session.expect_quit().returning(|| Ok(()));
        Ok(Box::new(session))
    });

    let sender = SmtpSender::new_with_connector("me@test.com", config, Arc::new(connector));
    assert!(sender.send(&test_email()).await.is_ok());
}

#[tokio::test]
async fn test_plaintext_mode_upgrades_opportunistically() {
    let config = SmtpConfig {
        use_tls: false,
        port: 0,
        ..test_smtp_config()
    };
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut connector = MockSmtpConnector::new();
    connector.expect_connect_tls().never();
    let l = log.clone();
    connector
        .expect_connect_plain()
        .with(eq("smtp.test.com"), eq(587u16))
        .returning(move |_, _| Ok(Box::new(recording_session(l.clone()))));

    let sender = SmtpSender::new_with_connector("me@test.com", config, Arc::new(connector));
    sender.send(&test_email()).await.unwrap();
    assert_eq!(log.lock().unwrap()[0], "STARTTLS smtp.test.com");
}

#[tokio::test]
async fn test_duplicate_and_hostile_recipients() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut connector = MockSmtpConnector::new();
    let l = log.clone();
    connector
        .expect_connect_tls()
        .returning(move |_, _| Ok(Box::new(recording_session(l.clone()))));

    let email = Email {
        from: Some("override@test.com\r\n".to_string()),
        to: vec!["a@x.com".to_string(), "\r\n".to_string()],
        cc: vec!["a@x.com".to_string()],
        bcc: vec![],
        ..test_email()
    };

    let sender = SmtpSender::new_with_connector("me@test.com", test_smtp_config(), Arc::new(connector));
    sender.send(&email).await.unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log[1], "MAIL FROM override@test.com");
    let rcpts: Vec<&String> = log.iter().filter(|c| c.starts_with("RCPT")).collect();
    assert_eq!(rcpts, vec!["RCPT TO a@x.com", "RCPT TO a@x.com"]);
}

#[tokio::test]
async fn test_no_recipients_fails_before_connecting() {
    let mut connector = MockSmtpConnector::new();
    connector.expect_connect_tls().never();
    connector.expect_connect_plain().never();

    let email = Email {
        to: vec![" \n".to_string()],
        cc: vec![],
        bcc: vec![],
        ..test_email()
    };

    let sender = SmtpSender::new_with_connector("me@test.com", test_smtp_config(), Arc::new(connector));
    let err = sender.send(&email).await.unwrap_err();
    assert_eq!(err.stage(), Some("recipients"));
}

#[tokio::test]
async fn test_unreadable_attachment_fails_before_connecting() {
    let mut connector = MockSmtpConnector::new();
    connector.expect_connect_tls().never();

    let email = Email {
        attachments: vec![Attachment::from_path("/no/such/attachment.txt")],
        ..test_email()
    };

    let sender = SmtpSender::new_with_connector("me@test.com", test_smtp_config(), Arc::new(connector));
    let err = sender.send(&email).await.unwrap_err();
    assert!(matches!(err, MailError::AttachmentRead { .. }));
}

fn plaintext_session() -> MockSmtpSession {
    let mut session = MockSmtpSession::new();
    session.expect_can_starttls().return_const(false);
    session.expect_starttls().never();
    session
}

#[tokio::test]
async fn test_plaintext_without_starttls_refuses_auth() {
    let config = SmtpConfig {
        use_tls: false,
        ..test_smtp_config()
    };

    let mut connector = MockSmtpConnector::new();
    connector.expect_connect_tls().never();
    connector.expect_connect_plain().returning(|_, _| {
        let mut session = plaintext_session();
        session.expect_authenticate().never();
        session.expect_mail_from().never();
        session.expect_quit().returning(|| Ok(()));
        Ok(Box::new(session))
    });

    let sender = SmtpSender::new_with_connector("me@test.com", config, Arc::new(connector));
    let err = sender.send(&test_email()).await.unwrap_err();
    assert!(matches!(err, MailError::Auth { .. }));
    assert!(err.to_string().contains("unencrypted"));
}

#[tokio::test]
async fn test_plaintext_auth_allowed_on_loopback() {
    let config = SmtpConfig {
        host: "127.0.0.1".to_string(),
        port: 2525,
        use_tls: false,
        ..test_smtp_config()
    };

    let mut connector = MockSmtpConnector::new();
    connector.expect_connect_plain().returning(|_, _| {
        let mut session = plaintext_session();
        session.expect_authenticate().times(1).returning(|_, _| Ok(()));
        session.expect_mail_from().returning(|_| Ok(()));
        session.expect_rcpt_to().times(3).returning(|_| Ok(()));
        session.expect_data().returning(|_| Ok(()));
        session.expect_quit().returning(|| Ok(()));
        Ok(Box::new(session))
    });

    let sender = SmtpSender::new_with_connector("me@test.com", config, Arc::new(connector));
    sender.send(&test_email()).await.unwrap();
}

#[tokio::test]
async fn test_plaintext_without_credentials_sends_unencrypted() {
    let config = SmtpConfig {
        username: String::new(),
        password: String::new(),
        use_tls: false,
        ..test_smtp_config()
    };

    let mut connector = MockSmtpConnector::new();
    connector.expect_connect_plain().returning(|_, _| {
        let mut session = plaintext_session();
        session.expect_authenticate().never();
        session.expect_mail_from().returning(|_| Ok(()));
        session.expect_rcpt_to().times(3).returning(|_| Ok(()));
        session.expect_data().returning(|_| Ok(()));
        session.expect_quit().returning(|| Ok(()));
        Ok(Box::new(session))
    });

    let sender = SmtpSender::new_with_connector("me@test.com", config, Arc::new(connector));
    sender.send(&test_email()).await.unwrap();
}

#[tokio::test]
async fn test_rejected_tls_session_does_not_fall_back() {
    let mut connector = MockSmtpConnector::new();
    connector.expect_connect_tls().times(1).returning(|_, _| {
        Err(anyhow::Error::new(SessionRejected(
            "554 no service for you".to_string(),
        )))
    });
    connector.expect_connect_plain().never();

    let sender = SmtpSender::new_with_connector("me@test.com", test_smtp_config(), Arc::new(connector));
    let err = sender.send(&test_email()).await.unwrap_err();
    assert_eq!(err.stage(), Some("connect"));
    assert!(err.to_string().contains("554"));
}

// Needs a real server: SMTP_TEST_HOST, SMTP_TEST_USER, SMTP_TEST_PASS, SMTP_TEST_TO
#[tokio::test]
#[ignore]
async fn test_real_smtp_send() {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let env = |key: &str| std::env::var(key).unwrap_or_else(|_| panic!("{} is not set", key));
    let config = SmtpConfig {
        host: env("SMTP_TEST_HOST"),
        port: 465,
        username: env("SMTP_TEST_USER"),
        password: env("SMTP_TEST_PASS"),
        use_tls: true,
    };

    let email = Email {
        to: vec![env("SMTP_TEST_TO")],
        subject: "mail-courier smtp test".to_string(),
        body: "sent by test_real_smtp_send".to_string(),
        ..Default::default()
    };

    let sender = SmtpSender::new(config.username.clone(), config);
    sender.send(&email).await.unwrap();
}

use std::{env::args, error::Error, time::Instant};

use lettre::{message::Message, AsyncSmtpTransport, AsyncTransport, Tokio1Executor};

/// Port the pigeon server listens on by default
const SMTP_PORT: u16 = 2500;

/// Sends a single alert mail to a local pigeon server.
///
/// Usage: `cargo run --example send_alert -- [subject] [body]`
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let subject = args().nth(1).unwrap_or_else(|| "Disk full".to_string());
    let body = args()
        .nth(2)
        .unwrap_or_else(|| "Root filesystem is above 95%.".to_string());

    let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous("localhost")
        .port(SMTP_PORT)
        .build();

    let email = Message::builder()
        .from("Monitor <monitor@example.com>".parse()?)
        .to("On Call <oncall@example.com>".parse()?)
        .subject(subject.as_str())
        .body(body)?;

    println!("Sending alert mail \"{subject}\"...");
    let send_start = Instant::now();
    let response = transport.send(email).await?;
    println!(
        "Server answered {} in {:?}",
        response.code(),
        send_start.elapsed()
    );

    Ok(())
}

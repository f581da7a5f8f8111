use std::io::BufRead;
use std::sync::Arc;

use botwire::{
    BotError, Config, InitOptions, MessageDirection, SessionController, UiDelegate, UiMessage,
};

struct ConsoleUi;

impl UiDelegate for ConsoleUi {
    fn add_message(&self, message: UiMessage) {
        match message.direction {
            MessageDirection::Sent => println!("you: {}", message.text),
            MessageDirection::Received => println!("bot: {}", message.text),
        }
        if let Some(url) = message.image_url {
            println!("   (image) {}", url);
        }
    }

    fn on_error(&self, error: &BotError) {
        eprintln!("error: {}", error);
    }

    fn on_end(&self) {
        println!("(session ended)");
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv_override().ok();
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    let config = Config::new();
    let controller = SessionController::builder(config, Arc::new(ConsoleUi)).build();

    controller
        .init(InitOptions::new().with_input_audio(false))
        .await
        .expect("failed to open session");

    println!("Connected. Type a message, or /quit to leave.");

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.expect("failed to read stdin");
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == "/quit" {
            break;
        }
        controller
            .handle_text_input(text, true, false)
            .expect("failed to send input");
    }

    controller.stop().expect("failed to stop session");
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
}

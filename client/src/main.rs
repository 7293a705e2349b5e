use std::time::Duration;

use clap::Parser;

use canvas_client::canvas_system::{Identity, Point, SessionStatus};
use canvas_client::{spawn_client, ClientConfig, ClientError, ClientEvent};

#[derive(Debug, Parser)]
#[command(name = "canvas-client", version, about = "Joins a shared canvas room from the terminal")]
struct Args {
    /// Base websocket URL of the server
    #[arg(long, env = "CANVAS_URL", default_value = "ws://127.0.0.1:8080")]
    url: String,

    #[arg(long, default_value = "demo")]
    room: String,

    /// Display name. A random user_xxxx is used when omitted.
    #[arg(long)]
    name: Option<String>,

    #[arg(long, default_value = "#1971c2")]
    color: String,

    /// Draw one diagonal stroke after joining
    #[arg(long)]
    demo_stroke: bool,
}

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    env_logger::init();
    let args = Args::parse();

    let identity = match args.name {
        Some(name) => Identity {
            name,
            color: args.color.clone(),
        },
        None => Identity::random(args.color.clone()),
    };
    log::info!("Joining room {} as {}", args.room, identity.name);

    let mut handle = spawn_client(ClientConfig::new(args.url, args.room, identity))?;

    if args.demo_stroke {
        handle
            .wait_for(|view| view.status == SessionStatus::Synced)
            .await?;
        let stroke_id = handle.begin_stroke(&args.color, 4.0).await?;
        for i in 0..=10 {
            let t = i as f32 / 10.0;
            let point = Point::new(0.2 + 0.6 * t, 0.2 + 0.6 * t);
            handle.set_cursor(Some(point)).await?;
            handle.append_point(&stroke_id, point).await?;
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        handle.set_cursor(None).await?;
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = handle.event_rx.recv() => match event {
                Some(ClientEvent::Stopped) | None => break,
                Some(ClientEvent::DocumentChanged) => {
                    let view = handle.view();
                    let points: usize = view.strokes.iter().map(|s| s.points.len()).sum();
                    log::info!("{} strokes, {} points", view.strokes.len(), points);
                }
                Some(ClientEvent::Error(e)) => log::warn!("{}", e),
                Some(event) => log::info!("{:?}", event),
            },
        }
    }

    handle.shutdown().await.ok();
    Ok(())
}

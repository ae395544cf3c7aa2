//! Fastest Finger
//!
//! `fastest-finger relay` runs the WebSocket relay.
//! `fastest-finger demo` (default) plays one scripted round in-process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use fastest_finger::{
    network::{QuestionBank, RelayConfig, RelayServer},
    spawn_host, spawn_participant, GradeGroup, LocalBus, MonotonicClock, RoundPhase,
    SessionConfig, MAX_LEADERBOARD_ENTRIES, VERSION,
};

const DEMO_QUESTIONS: &str = r#"[
    {
        "gradeGroup": "3-4",
        "text": "Which planet is known as the Red Planet?",
        "options": [
            {"id": "A", "text": "Venus"},
            {"id": "B", "text": "Mars"},
            {"id": "C", "text": "Jupiter"},
            {"id": "D", "text": "Saturn"}
        ],
        "correctAnswerId": "B"
    },
    {
        "gradeGroup": "3-4",
        "text": "How many legs does a spider have?",
        "options": [
            {"id": "A", "text": "6"},
            {"id": "B", "text": "8"},
            {"id": "C", "text": "10"},
            {"id": "D", "text": "12"}
        ],
        "correctAnswerId": "B"
    }
]"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Fastest Finger v{}", VERSION);

    match std::env::args().nth(1).as_deref() {
        None | Some("demo") => demo_round().await,
        Some("relay") => run_relay().await,
        Some(other) => bail!("Unknown mode {other:?}, expected `demo` or `relay`"),
    }
}

/// Run the relay until Ctrl-C.
async fn run_relay() -> anyhow::Result<()> {
    let config = RelayConfig::from_env();
    info!("Max connections: {}", config.max_connections);

    let relay = Arc::new(RelayServer::bind(config).await?);
    let server = relay.clone();
    let task = tokio::spawn(async move { server.run().await });

    tokio::signal::ctrl_c().await?;
    relay.shutdown();
    task.await??;
    Ok(())
}

/// Play one round with three scripted students.
async fn demo_round() -> anyhow::Result<()> {
    info!("=== Starting Demo Round ===");

    let config = SessionConfig::from_env();
    info!(
        "Topic: {}, round: {} s, leaderboard cap: {}",
        config.topic, config.round.round_duration_secs, MAX_LEADERBOARD_ENTRIES
    );

    let bus = LocalBus::new(config.topic.clone(), 256);
    let clock = MonotonicClock::shared();
    let bank = QuestionBank::from_json(DEMO_QUESTIONS)?;

    let host = spawn_host(&config, &bus, clock.clone());
    info!("Host epoch: {}", hex::encode(&host.epoch().as_bytes()[..4]));

    let script = [("Bob", "B", 1_500), ("Cara", "B", 1_500), ("Alice", "B", 2_100), ("Dan", "A", 800)];
    let mut students = Vec::new();
    for (name, _, _) in &script {
        let student = spawn_participant(&config, &bus, clock.clone());
        student.join_game(*name).await?;
        students.push(student);
    }

    host.generate_question(&bank, GradeGroup::Grades3To4).await?;
    host.start_game().await?;

    let mut answers = Vec::new();
    for (student, (_, answer, delay_ms)) in students.iter().zip(script) {
        let student = student.clone();
        answers.push(tokio::spawn(async move {
            student.subscribe().wait_for(|v| v.phase == RoundPhase::Active).await?;
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            student.submit_answer(answer).await.map_err(anyhow::Error::from)
        }));
    }
    for answer in answers {
        if let Some(submission) = answer.await?? {
            info!("{} answered {}", submission.participant_id, submission.answer_id);
        }
    }

    // Everyone has answered; no need to wait out the clock.
    host.end_game().await?;

    let view = host.view();
    let start = view.start_time.context("Round never started")?;
    let question = view.question.context("Round has no question")?;
    info!("Question: {}", question.text);
    info!("Correct answer: {}", question.correct_option_text());
    info!("Votes: {:?}", view.vote_counts);
    for (position, result) in view.results.iter().enumerate() {
        info!(
            "#{} {} ({} ms)",
            position + 1,
            result.participant_id(),
            result.elapsed_since(start).num_milliseconds()
        );
    }

    for student in &students {
        let mut rx = student.subscribe();
        rx.wait_for(|v| v.phase == RoundPhase::Ended).await?;
        if let Some(local) = student.view().local {
            info!(
                "{} sees: correct={:?} rank={:?}",
                local.name, local.answered_correctly, local.rank
            );
        }
        student.shutdown().await?;
    }

    host.reset_game().await?;
    host.shutdown().await?;

    info!("=== Demo Complete ===");
    Ok(())
}

//! promptfix - turn a rough intent into a structured LLM prompt
//!
//! Generates an optimized prompt, asks follow-up questions, folds the
//! answers back in, and optionally runs a structural self-audit.

use anyhow::Result;
use clap::{Parser, Subcommand};
use promptfix_adapters::config::Config;
use promptfix_core::protocol::Upstream;
use promptfix_core::strategy::{Strategy, StrategyMode};
use promptfix_engine::{
    open_history, open_session, GatewaySession, Orchestrator, Outcome, TokenGate,
};
use std::io::{self, BufRead, Write};
use tracing_subscriber::EnvFilter;

const TOKEN_ENV_VAR: &str = "PROMPTFIX_VERIFICATION_TOKEN";
const LOG_ENV_VAR: &str = "PROMPTFIX_LOG";

#[derive(Parser, Debug)]
#[command(
    name = "promptfix",
    about = "Turn a rough intent into an optimized LLM prompt",
    long_about = "P R O M P T F I X\n\n\
                  Builds a structured prompt (CO-STAR, RISEN, or RACE) from a short intent,\n\
                  then refines it with your answers to follow-up questions.",
    version
)]
struct Args {
    /// Log debug output to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate an optimized prompt from an intent
    Generate {
        /// What you want the prompt to achieve
        #[arg(required = true, num_args = 1..)]
        intent: Vec<String>,

        /// auto, co-star, risen, or race (defaults to the configured strategy)
        #[arg(long, short)]
        strategy: Option<StrategyMode>,

        /// Verification token (falls back to PROMPTFIX_VERIFICATION_TOKEN)
        #[arg(long)]
        token: Option<String>,

        /// Print the first result and exit without asking follow-ups
        #[arg(long)]
        no_interactive: bool,
    },
    /// List recent generations
    History {
        /// Remove all saved entries
        #[arg(long)]
        clear: bool,
    },
    /// List the available strategies
    Strategies,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Generate {
            intent,
            strategy,
            token,
            no_interactive,
        } => {
            let intent = intent.join(" ");
            let token = token.or_else(|| std::env::var(TOKEN_ENV_VAR).ok());
            run_generate(&intent, strategy, token, !no_interactive).await
        }
        Command::History { clear } => show_history(clear),
        Command::Strategies => {
            show_strategies();
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("promptfix=debug,promptfix_engine=debug,promptfix_adapters=debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV_VAR)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| {
                EnvFilter::new("promptfix=info,promptfix_engine=info,promptfix_adapters=info")
            })
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

async fn run_generate(
    intent: &str,
    strategy: Option<StrategyMode>,
    token: Option<String>,
    interactive: bool,
) -> Result<()> {
    let config = Config::load();
    let mut session = open_session(&config)?;
    if let Some(strategy) = strategy {
        session.set_strategy(strategy);
    }
    let mut gate = TokenGate::with_token(token);
    let policy = TokenPolicy {
        required: config.require_verification,
        interactive,
    };

    if !attempt(&mut session, &mut gate, policy, Step::Generate(intent)).await? {
        return Err(anyhow::anyhow!(
            "{}",
            session.error().unwrap_or("Generation did not complete")
        ));
    }
    print_result(&session);

    if !interactive {
        return Ok(());
    }

    while !session.questions().is_empty() {
        if !collect_answers(&mut session)? {
            break;
        }
        if !attempt(&mut session, &mut gate, policy, Step::BatchRefine(intent)).await? {
            break;
        }
        print_result(&session);
    }

    if confirm("Run a structural self-audit of the prompt?")?
        && attempt(&mut session, &mut gate, policy, Step::AutoRefine).await?
    {
        print_result(&session);
    }

    Ok(())
}

/// How to obtain verification tokens during a session.
#[derive(Clone, Copy)]
struct TokenPolicy {
    required: bool,
    /// Ask on stdin when the gate is empty.
    interactive: bool,
}

#[derive(Clone, Copy)]
enum Step<'a> {
    Generate(&'a str),
    BatchRefine(&'a str),
    AutoRefine,
}

/// Run one transition, asking for a fresh verification token when the gate
/// blocks it. Returns whether the result was applied.
async fn attempt<U: Upstream>(
    session: &mut Orchestrator<U>,
    gate: &mut TokenGate,
    policy: TokenPolicy,
    step: Step<'_>,
) -> Result<bool> {
    loop {
        if policy.required && !gate.is_valid() {
            if !policy.interactive {
                tracing::warn!("no verification token available");
                eprintln!("  ! {}", promptfix_engine::VERIFICATION_REQUIRED_MESSAGE);
                eprintln!("  Pass --token or set {}.", TOKEN_ENV_VAR);
                return Ok(false);
            }
            request_token(gate)?;
            if !gate.is_valid() {
                continue;
            }
        }

        eprint!("  Working...");
        let outcome = match step {
            Step::Generate(intent) => session.generate(intent, gate).await,
            Step::BatchRefine(intent) => session.batch_refine(intent, gate).await,
            Step::AutoRefine => session.auto_refine(gate).await,
        };
        eprintln!();

        match outcome {
            Outcome::Applied => return Ok(true),
            Outcome::Skipped => return Ok(false),
            Outcome::Blocked if policy.interactive => continue,
            Outcome::Rejected => {
                // The refused token is spent either way.
                gate.widget_error("verification service rejected the token");
                report_failure(session.error());
                if !policy.interactive {
                    return Ok(false);
                }
            }
            Outcome::Blocked | Outcome::Failed => {
                report_failure(session.error());
                return Ok(false);
            }
        }
    }
}

fn report_failure(error: Option<&str>) {
    if let Some(err) = error {
        tracing::error!("step failed: {}", err);
        eprintln!("  ! {}", err);
    }
}

/// Stand-in for the verification widget: the user pastes a token.
fn request_token(gate: &mut TokenGate) -> Result<()> {
    if gate.awaiting_new() {
        eprintln!("  The previous verification token was used.");
    }
    let line = prompt_line("  Paste a verification token: ")?;
    if gate.complete_widget(line).is_err() {
        if let Some(err) = gate.last_error() {
            tracing::warn!("verification token not accepted: {}", err);
            eprintln!("  ! {}", err);
        }
    }
    Ok(())
}

/// Returns false when the user gave no answers.
fn collect_answers(session: &mut GatewaySession) -> Result<bool> {
    println!();
    println!("  Answer any questions to refine the prompt (Enter to skip):");
    let questions: Vec<String> = session.questions().to_vec();
    let mut answered = false;
    for (index, question) in questions.iter().enumerate() {
        let answer = prompt_line(&format!("  {}. {}\n     > ", index + 1, question))?;
        if !answer.trim().is_empty() {
            answered = true;
        }
        session.set_answer(index, answer);
    }
    Ok(answered)
}

fn print_result(session: &GatewaySession) {
    println!();
    if let Some(label) = session.strategy_label() {
        println!("  Strategy: {}", label);
        println!();
    }
    println!("{}", session.optimized_output());
    if !session.questions().is_empty() {
        println!();
        println!("  Follow-up questions:");
        for (index, question) in session.questions().iter().enumerate() {
            println!("    {}. {}", index + 1, question);
        }
    }
}

fn show_history(clear: bool) -> Result<()> {
    let mut history = open_history();
    if clear {
        history.clear();
        println!("  History cleared.");
        return Ok(());
    }
    if history.is_empty() {
        println!("  No history yet.");
        return Ok(());
    }
    for (index, entry) in history.entries().iter().enumerate() {
        println!(
            "  {}. [{}] {}",
            index + 1,
            entry.created_at.format("%Y-%m-%d %H:%M"),
            entry.intent
        );
        for line in entry.optimized_output.lines().take(3) {
            println!("       {}", line);
        }
    }
    Ok(())
}

fn show_strategies() {
    for strategy in Strategy::all() {
        println!("  {} ({})", strategy.id(), strategy.label());
        println!("    {}", strategy.description());
        println!("    Use for: {}", strategy.use_case());
        println!();
    }
}

fn prompt_line(prompt: &str) -> Result<String> {
    let mut stdout = io::stdout();
    write!(stdout, "{}", prompt)?;
    stdout.flush()?;
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Err(anyhow::anyhow!("stdin closed"));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn confirm(question: &str) -> Result<bool> {
    let answer = prompt_line(&format!("  {} [y/N] ", question))?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

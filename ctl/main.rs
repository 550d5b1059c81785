#![forbid(unsafe_code)]

//! `acp-bridge-ctl`: console client for a running `acp-bridge`.
//!
//! Connects to the instance socket, sends one prompt, streams the answer to
//! stdout and answers permission requests on the terminal. The session id
//! returned in `done` is printed to stderr so it can be passed back with
//! `--session` to continue the conversation.

use std::io::{self, BufRead, BufReader, IsTerminal, Read, Write};
use std::path::PathBuf;

use clap::Parser;
use interprocess::local_socket::{traits::Stream as _, GenericFilePath, Stream, ToFsName};

use acp_bridge::ipc::protocol::{
    encode_line, ClientMessage, PermissionChoice, PromptRequest, ServiceMessage,
};

/// Invalid answers tolerated before a permission request is cancelled.
const CHOICE_ATTEMPTS: usize = 3;

#[derive(Debug, Parser)]
#[command(
    name = "acp-bridge-ctl",
    about = "Send a prompt to a running acp-bridge",
    version,
    long_about = None
)]
struct Cli {
    /// Prompt text. Read from stdin when omitted.
    prompt: Vec<String>,

    /// Socket path. Overrides `--instance` and `--socket-root`.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Instance name of the bridge.
    #[arg(long, default_value = "acp")]
    instance: String,

    /// Directory holding the instance socket.
    #[arg(long, default_value = ".")]
    socket_root: PathBuf,

    /// Session to continue.
    #[arg(long)]
    session: Option<String>,

    /// Mode (agent) to switch to before prompting.
    #[arg(long)]
    mode: Option<String>,

    /// Approve tool permissions once, without asking.
    #[arg(long)]
    auto_approve: bool,

    /// Approve tool permissions for the rest of the session, without asking.
    #[arg(long)]
    allow_always: bool,

    /// Print tool events to stderr.
    #[arg(long)]
    show_tools: bool,

    /// Strip newlines before the first streamed text.
    #[arg(long)]
    strip_leading_newlines: bool,
}

impl Cli {
    fn socket_path(&self) -> PathBuf {
        self.socket
            .clone()
            .unwrap_or_else(|| self.socket_root.join(format!("{}.sock", self.instance)))
    }

    fn resolve_prompt(&self) -> Result<String, Box<dyn std::error::Error>> {
        let joined = self.prompt.join(" ");
        let text = joined.trim();
        if !text.is_empty() {
            return Ok(text.to_owned());
        }
        if !io::stdin().is_terminal() {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            let text = buf.trim();
            if !text.is_empty() {
                return Ok(text.to_owned());
            }
        }
        Err("prompt text is required (argument or stdin)".into())
    }
}

fn main() {
    let args = Cli::parse();
    let socket = args.socket_path();

    match run(&args) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("Error: {err}");
            eprintln!("Is acp-bridge listening on '{}'?", socket.display());
            std::process::exit(1);
        }
    }
}

/// Run one prompt; `Ok(false)` when the bridge answered with an error.
fn run(args: &Cli) -> Result<bool, Box<dyn std::error::Error>> {
    let prompt = args.resolve_prompt()?;
    let name = args.socket_path().to_fs_name::<GenericFilePath>()?;
    let stream = Stream::connect(name)?;
    let (recv, mut send) = stream.split();
    let mut reader = BufReader::new(recv);

    let request = ClientMessage::Prompt(PromptRequest {
        session_id: args.session.clone(),
        prompt,
        mode_id: args.mode.clone(),
        auto_approve: args.auto_approve || args.allow_always,
        allow_always: args.allow_always,
        show_tools: args.show_tools,
        strip_leading_newlines: args.strip_leading_newlines,
    });
    send_line(&mut send, &request)?;

    let mut stdout = io::stdout().lock();
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err("bridge closed the connection".into());
        }
        let message: ServiceMessage = match serde_json::from_str(line.trim()) {
            Ok(message) => message,
            Err(_) => continue,
        };

        match message {
            ServiceMessage::Chunk { text } => {
                stdout.write_all(text.as_bytes())?;
                stdout.flush()?;
            }
            ServiceMessage::Tool { event, title } => {
                eprintln!("[tool] {event:?}: {title}");
            }
            ServiceMessage::PermissionRequest { title, options } => {
                let option_id = choose(&title, &options)?;
                send_line(&mut send, &ClientMessage::PermissionResponse { option_id })?;
            }
            ServiceMessage::Error { message } => {
                writeln!(stdout)?;
                eprintln!("[error] {message}");
                return Ok(false);
            }
            ServiceMessage::Done { session_id } => {
                writeln!(stdout)?;
                eprintln!("session: {session_id}");
                return Ok(true);
            }
        }
    }
}

fn send_line<W: Write>(
    writer: &mut W,
    message: &ClientMessage,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut line = encode_line(message)?;
    line.push('\n');
    writer.write_all(line.as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Ask the user for a permission choice.
///
/// Without a terminal, `reject_once` is chosen when offered; otherwise the
/// request is cancelled.
fn choose(
    title: &str,
    options: &[PermissionChoice],
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    if !io::stdin().is_terminal() {
        return Ok(options
            .iter()
            .find(|o| o.option_id == "reject_once")
            .map(|o| o.option_id.clone()));
    }

    eprintln!("\nPermission required: {title}");
    for (idx, option) in options.iter().enumerate() {
        eprintln!("  {}) {} ({})", idx + 1, option.name, option.option_id);
    }

    let stdin = io::stdin();
    for _ in 0..CHOICE_ATTEMPTS {
        eprint!("Select option: ");
        io::stderr().flush()?;
        let mut answer = String::new();
        if stdin.lock().read_line(&mut answer)? == 0 {
            break;
        }
        let answer = answer.trim();
        if answer.is_empty() {
            continue;
        }
        if let Some(option) = pick(options, answer) {
            return Ok(Some(option.option_id.clone()));
        }
        eprintln!("Invalid option. Enter a number or option id.");
    }

    eprintln!("No valid option chosen; cancelling.");
    Ok(None)
}

/// Match an answer against option ids first, then 1-based positions.
fn pick<'a>(options: &'a [PermissionChoice], answer: &str) -> Option<&'a PermissionChoice> {
    options
        .iter()
        .find(|o| o.option_id == answer)
        .or_else(|| {
            answer
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|idx| options.get(idx))
        })
}

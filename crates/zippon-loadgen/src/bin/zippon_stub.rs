//! Stand-in collaborator for the integration tests.
//!
//! Reads `run "<body>"` / `quit` lines on stdin and answers on stdout with
//! ETX-terminated frames, shaped by the mode argument.

use std::env;
use std::io::{self, BufRead, Write};
use std::process;
use std::thread;

use zippon_loadgen::ETX;

const USAGE: &str = "usage: zippon_stub [echo|ok|trailing|truncate|silent|exit|stderr]";

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Answer with the request body.
    Echo,
    /// Answer `OK` to every request.
    Ok,
    /// Echo, then write bytes after the ETX that never get terminated.
    Trailing,
    /// Write part of an answer to the first request, then exit.
    Truncate,
    /// Never answer, ignore `quit`, and stay alive after stdin closes.
    Silent,
    /// Exit before reading anything.
    Exit,
    /// Echo after flooding stderr.
    Stderr,
}

fn parse_mode(arg: Option<&str>) -> Option<Mode> {
    Some(match arg.unwrap_or("echo") {
        "echo" => Mode::Echo,
        "ok" => Mode::Ok,
        "trailing" => Mode::Trailing,
        "truncate" => Mode::Truncate,
        "silent" => Mode::Silent,
        "exit" => Mode::Exit,
        "stderr" => Mode::Stderr,
        _ => return None,
    })
}

fn main() {
    let mut args = env::args().skip(1);
    let Some(mode) = parse_mode(args.next().as_deref()) else {
        eprintln!("{USAGE}");
        process::exit(2);
    };
    if args.next().is_some() {
        eprintln!("{USAGE}");
        process::exit(2);
    }
    if mode == Mode::Exit {
        return;
    }

    if let Err(err) = serve(mode) {
        eprintln!("zippon_stub: {err}");
        process::exit(1);
    }
}

fn serve(mode: Mode) -> io::Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim_end();

        if line == "quit" {
            if mode == Mode::Silent {
                continue;
            }
            return Ok(());
        }
        let Some(body) = line
            .strip_prefix("run \"")
            .and_then(|rest| rest.strip_suffix('"'))
        else {
            write_frame(&mut out, format!("Error: unknown request `{line}`").as_bytes())?;
            continue;
        };

        match mode {
            Mode::Echo => write_frame(&mut out, body.as_bytes())?,
            Mode::Ok => write_frame(&mut out, b"OK\n")?,
            Mode::Trailing => {
                // One write, so the tail is already buffered when the frame lands.
                let mut bytes = body.as_bytes().to_vec();
                bytes.push(ETX);
                bytes.extend_from_slice(b"after-etx noise");
                out.write_all(&bytes)?;
                out.flush()?;
            }
            Mode::Truncate => {
                out.write_all(b"partial ")?;
                out.write_all(&body.as_bytes()[..body.len().min(8)])?;
                out.flush()?;
                return Ok(());
            }
            Mode::Stderr => {
                let stderr = io::stderr();
                let mut err = stderr.lock();
                for i in 0..4096 {
                    writeln!(err, "stub diagnostic line {i}: {}", "x".repeat(48))?;
                }
                write_frame(&mut out, body.as_bytes())?;
            }
            Mode::Silent | Mode::Exit => {}
        }
    }

    if mode == Mode::Silent {
        loop {
            thread::park();
        }
    }
    Ok(())
}

fn write_frame(out: &mut impl Write, text: &[u8]) -> io::Result<()> {
    out.write_all(text)?;
    out.write_all(&[ETX])?;
    out.flush()
}

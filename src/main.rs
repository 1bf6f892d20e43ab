use std::io::Write;

use lumbung::{
    Cursor, Engine, EngineConfig, InsertOutcome, RecordId, RemoveOutcome, TransactionId,
};
use rustyline::{DefaultEditor, error::ReadlineError};
use tracing_subscriber::EnvFilter;

const HISTORY_FILE: &str = ".lumbung_history";

fn read_multiline_command(rl: &mut DefaultEditor) -> rustyline::Result<String> {
    let mut input = String::new();
    let mut prompt = "lumbung> ".to_string();

    loop {
        let line = rl.readline(&prompt)?;
        let trimmed_line = line.trim_end();

        // Check if line ends with backslash (multiline continuation)
        if let Some(continued) = trimmed_line.strip_suffix('\\') {
            input.push_str(continued);
            input.push(' ');
            prompt = "      -> ".to_string();
        } else {
            input.push_str(trimmed_line);
            break;
        }
    }

    Ok(input)
}

/// The shell's view of the store: the engine plus the transaction opened
/// with `begin`, if any.
struct Session {
    engine: Engine,
    current: Option<TransactionId>,
}

impl Session {
    /// Runs `action` in the open transaction, or in one of its own that is
    /// committed on success and aborted on failure.
    fn in_transaction<T>(
        &mut self,
        action: impl FnOnce(&Engine, TransactionId) -> lumbung::Result<T>,
    ) -> lumbung::Result<T> {
        if let Some(xid) = self.current {
            return action(&self.engine, xid);
        }
        let xid = self.engine.begin()?;
        match action(&self.engine, xid) {
            Ok(value) => {
                self.engine.commit(xid)?;
                Ok(value)
            }
            Err(e) => {
                self.engine.abort(xid)?;
                Err(e)
            }
        }
    }

    fn execute(&mut self, words: &[&str]) -> lumbung::Result<()> {
        match words {
            ["begin"] => {
                if let Some(xid) = self.current {
                    println!("transaction {} is already open", xid);
                } else {
                    let xid = self.engine.begin()?;
                    self.current = Some(xid);
                    println!("began transaction {}", xid);
                }
            }
            ["commit"] => match self.current.take() {
                Some(xid) => {
                    self.engine.commit(xid)?;
                    println!("committed {}", xid);
                }
                None => println!("no open transaction"),
            },
            ["abort"] => match self.current.take() {
                Some(xid) => {
                    self.engine.abort(xid)?;
                    println!("aborted {}", xid);
                }
                None => println!("no open transaction"),
            },
            ["create"] => {
                let table = self.in_transaction(|engine, xid| {
                    let table = engine.hash_create(xid)?;
                    engine.write(xid, RecordId::Root, &table.to_bytes())?;
                    Ok(table)
                })?;
                println!("created table {} (stored in ROOT)", table);
            }
            ["root"] => {
                let xid = self.current.unwrap_or(lumbung::INVALID_XID);
                let bytes = self.engine.read(xid, RecordId::Root)?;
                println!("ROOT -> {}", RecordId::from_bytes(&bytes)?);
            }
            ["put", table, key, value] => {
                let table = table.parse::<RecordId>()?;
                let outcome = self.in_transaction(|engine, xid| {
                    engine.hash_insert(xid, table, key.as_bytes(), value.as_bytes())
                })?;
                match outcome {
                    InsertOutcome::Inserted => println!("inserted"),
                    InsertOutcome::Updated => println!("updated"),
                }
            }
            ["get", table, key] => {
                let table = table.parse::<RecordId>()?;
                let xid = self.current.unwrap_or(lumbung::INVALID_XID);
                match self.engine.hash_lookup(xid, table, key.as_bytes())? {
                    Some(value) => println!("{}", String::from_utf8_lossy(&value)),
                    None => println!("(not found)"),
                }
            }
            ["del", table, key] => {
                let table = table.parse::<RecordId>()?;
                let outcome = self
                    .in_transaction(|engine, xid| engine.hash_remove(xid, table, key.as_bytes()))?;
                match outcome {
                    RemoveOutcome::Removed => println!("removed"),
                    RemoveOutcome::NotFound => println!("(not found)"),
                }
            }
            ["scan", table] => {
                let table = table.parse::<RecordId>()?;
                let xid = self.current.unwrap_or(lumbung::INVALID_XID);
                let mut cursor = self.engine.hash_iterator(xid, table)?;
                let mut count = 0;
                while cursor.advance()? {
                    if let (Some(key), Some(value)) = (cursor.key()?, cursor.value()?) {
                        println!(
                            "{} = {}",
                            String::from_utf8_lossy(key),
                            String::from_utf8_lossy(value)
                        );
                        count += 1;
                    }
                }
                cursor.close();
                println!("({} entries)", count);
            }
            ["checkpoint"] => {
                let truncated = self.engine.checkpoint()?;
                println!("checkpoint taken{}", if truncated { ", log truncated" } else { "" });
            }
            _ => println!("unknown command, type 'help'"),
        }
        Ok(())
    }
}

/// Returns false when the shell should exit.
fn process_command(session: &mut Session, command: &str) -> bool {
    let words: Vec<&str> = command.split_whitespace().collect();

    match words.first().map(|word| word.to_lowercase()).as_deref() {
        Some("exit" | "quit" | "q") => {
            println!("Goodbye!");
            return false;
        }
        Some("help" | "h") => {
            println!(
                r#"
Available commands:
  begin | commit | abort       - Open or finish an explicit transaction
  create                       - Create a hash table and park its id in ROOT
  root                         - Show the record id stored in ROOT
  put <table> <key> <value>    - Insert or update a key
  get <table> <key>            - Look up a key
  del <table> <key>            - Remove a key
  scan <table>                 - List every key of a table
  checkpoint                   - Flush pages and truncate the log if possible
  clear                        - Clear the screen
  help, h                      - Show this help message
  exit, quit, q                - Exit

Tables are named by record id, e.g. 2:1:40. Without 'begin' every
command runs in its own transaction.
Use '\' at the end of a line for multiline input.
"#
            );
        }
        Some("clear") => {
            print!("\x1B[2J\x1B[1;1H");
            let _ = std::io::stdout().flush();
        }
        None => {}
        Some(_) => {
            if let Err(e) = session.execute(&words) {
                println!("Error: {}", e);
            }
        }
    }

    true
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = EngineConfig::from_env()?;
    println!("LUMBUNG record store ({})", config.page_file.display());
    let mut session = Session {
        engine: Engine::init(config)?,
        current: None,
    };

    let mut rl = DefaultEditor::new()?;
    let _ = rl.load_history(HISTORY_FILE);

    loop {
        match read_multiline_command(&mut rl) {
            Ok(input) => {
                let command = input.trim().to_string();
                if !command.is_empty() {
                    rl.add_history_entry(&command)?;
                    if !process_command(&mut session, &command) {
                        break;
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("Interrupted");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("EOF");
                break;
            }
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }

    let _ = rl.save_history(HISTORY_FILE);
    session.engine.deinit()?;
    Ok(())
}

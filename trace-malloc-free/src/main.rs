use log::{debug, info};
use quicli::prelude::*;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use structopt::StructOpt;
use tag_alloc::units::Bytes;
use tag_alloc::{Config, TagAlloc};
use tag_alloc_test::{Alloc, Free, Operation, Operations, Realloc};

/// Record the mallocs, reallocs and frees of some program as a trace, and
/// replay traces against `tag_alloc`.
#[derive(Debug, StructOpt)]
#[structopt(name = "trace-malloc-free")]
struct Cli {
    #[structopt(flatten)]
    verbosity: Verbosity,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Trace the allocations of a command. Depends on valgrind being
    /// installed.
    #[structopt(name = "record")]
    Record {
        /// The file path to write the traced output into.
        #[structopt(short = "o", long = "output", parse(from_os_str))]
        output: PathBuf,

        /// The command to spawn and trace its mallocs and frees.
        command: Vec<String>,
    },

    /// Replay a trace against a fresh heap and report how it went.
    #[structopt(name = "replay")]
    Replay {
        /// Arena capacity in bytes.
        #[structopt(long = "max-heap")]
        max_heap: Option<usize>,

        /// Minimum heap growth in bytes.
        #[structopt(long = "chunk-size")]
        chunk_size: Option<usize>,

        /// The trace to replay.
        #[structopt(parse(from_os_str))]
        trace: PathBuf,
    },
}

fn main() -> CliResult {
    let cli = Cli::from_args();
    cli.verbosity.setup_env_logger(env!("CARGO_PKG_NAME"))?;

    match cli.command {
        Command::Record { output, command } => record(&output, &command)?,
        Command::Replay {
            max_heap,
            chunk_size,
            trace,
        } => replay(&trace, max_heap, chunk_size)?,
    }
    Ok(())
}

fn record(output: &Path, command: &[String]) -> Result<(), Error> {
    let mut output = BufWriter::new(fs::File::create(output)?);

    let mut args = vec![
        "--trace-malloc=yes".to_string(),
        "--trace-children=yes".to_string(),
    ];
    args.extend(command.iter().cloned());

    let stderr = duct::cmd("valgrind", &args)
        .stderr_capture()
        .unchecked()
        .run()?
        .stderr;
    let stderr = String::from_utf8(stderr)?;

    let mut recorder = TraceRecorder::new()?;
    let mut num_ops = 0;
    for line in stderr.lines() {
        if let Some(op) = recorder.parse_line(line)? {
            writeln!(&mut output, "{}", op)?;
            num_ops += 1;
        }
    }

    output.flush()?;
    info!(
        "recorded {} operations, {} allocations never freed",
        num_ops,
        recorder.active_allocs.len()
    );
    Ok(())
}

/// Turns valgrind's `--trace-malloc` log lines into trace operations.
struct TraceRecorder {
    malloc_re: Regex,
    calloc_re: Regex,
    realloc_re: Regex,
    memalign_re: Regex,
    free_re: Regex,
    num_allocs: usize,
    // Live pointer to the index of the `Alloc` that produced it.
    active_allocs: HashMap<usize, usize>,
}

impl TraceRecorder {
    fn new() -> Result<TraceRecorder, Error> {
        Ok(TraceRecorder {
            malloc_re: Regex::new(
                r#"^\-\-\d+\-\- (realloc\(0x0,\d+\))?malloc\((?P<size>\d+)\) = 0x(?P<ptr>\w+)$"#,
            )?,
            calloc_re: Regex::new(
                r#"^\-\-\d+\-\- calloc\((?P<num>\d+),(?P<size>\d+)\) = 0x(?P<ptr>\w+)$"#,
            )?,
            realloc_re: Regex::new(
                r#"^\-\-\d+\-\- realloc\(0x(?P<orig>\w+),(?P<size>\d+)\) = 0x(?P<new>\w+)$"#,
            )?,
            // Alignment is not replayed, only the size.
            memalign_re: Regex::new(
                r#"^\-\-\d+\-\- memalign\(al \d+, size (?P<size>\d+)\) = 0x(?P<ptr>\w+)$"#,
            )?,
            free_re: Regex::new(r#"^\-\-\d+\-\- free\(0x(?P<ptr>\w+)\)$"#)?,
            num_allocs: 0,
            active_allocs: HashMap::new(),
        })
    }

    fn new_alloc(&mut self, ptr: usize, size: usize) -> Operation {
        self.active_allocs.insert(ptr, self.num_allocs);
        self.num_allocs += 1;
        Alloc(size)
    }

    /// The operation a log line records, if any.
    fn parse_line(&mut self, line: &str) -> Result<Option<Operation>, Error> {
        let op = if let Some(captures) = self.malloc_re.captures(line) {
            let size: usize = captures["size"].parse()?;
            let ptr = usize::from_str_radix(&captures["ptr"], 16)?;
            self.new_alloc(ptr, size)
        } else if let Some(captures) = self.calloc_re.captures(line) {
            let num: usize = captures["num"].parse()?;
            let size: usize = captures["size"].parse()?;
            let ptr = usize::from_str_radix(&captures["ptr"], 16)?;
            self.new_alloc(ptr, num * size)
        } else if let Some(captures) = self.realloc_re.captures(line) {
            let orig = usize::from_str_radix(&captures["orig"], 16)?;
            let size: usize = captures["size"].parse()?;
            let new = usize::from_str_radix(&captures["new"], 16)?;
            match self.active_allocs.remove(&orig) {
                Some(idx) => {
                    if size > 0 {
                        self.active_allocs.insert(new, idx);
                    }
                    Realloc(idx, size)
                }
                None => {
                    debug!("realloc of untraced pointer {:#x}", orig);
                    self.new_alloc(new, size)
                }
            }
        } else if let Some(captures) = self.memalign_re.captures(line) {
            let size: usize = captures["size"].parse()?;
            let ptr = usize::from_str_radix(&captures["ptr"], 16)?;
            self.new_alloc(ptr, size)
        } else if let Some(captures) = self.free_re.captures(line) {
            let ptr = usize::from_str_radix(&captures["ptr"], 16)?;
            match self.active_allocs.remove(&ptr) {
                Some(idx) => Free(idx),
                None => return Ok(None),
            }
        } else {
            return Ok(None);
        };
        Ok(Some(op))
    }
}

fn replay(trace: &Path, max_heap: Option<usize>, chunk_size: Option<usize>) -> Result<(), Error> {
    let ops: Operations = fs::read_to_string(trace)?.parse()?;

    println!("#");
    println!("# Allocations by log2(Size)");
    println!("#");
    println!("{}", ops.size_histogram());
    println!("#");
    println!("# Allocations by Lifetime");
    println!("#");
    println!("{}", ops.lifetime_histogram());

    let mut config = Config::default();
    if let Some(max_heap) = max_heap {
        config = config.with_max_heap(Bytes(max_heap));
    }
    if let Some(chunk_size) = chunk_size {
        config = config.with_chunk_size(Bytes(chunk_size));
    }
    let mut heap = TagAlloc::with_config(config)?;

    let result = ops.run_with_heap(&mut heap);

    let heap_size = heap.heap_size();
    println!("{}", heap.stats());
    if let Ok(ref replay) = result {
        println!("operations:       {}", replay.operations);
        println!("failed requests:  {}", replay.failed);
        println!("peak live bytes:  {}", replay.peak_live_payload);
        println!(
            "peak utilization: {:.1}%",
            replay.utilization(heap_size.0) * 100.0
        );
    }
    let status = heap.check_consistency();
    print!("{}", status);

    // Every operation was followed by a consistency check, so a heap that
    // ends up inconsistent always surfaces here as an error.
    result?;
    Ok(())
}

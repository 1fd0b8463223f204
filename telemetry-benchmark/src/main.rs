use getopts::Options;
use hdrhistogram::Histogram as HdrHistogram;
use log::{error, info};
use portable_atomic::AtomicU64;
use quanta::Clock;
use std::{
    env,
    io::{self, Read as _, Write as _},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use telemetry_line_protocol::{Parser, Reader};
use telemetry_metric::{Builder, MetricError, Precision};
use telemetry_tracking::with_group_tracking;

/// Settings shared by every producer.
#[derive(Clone)]
struct Config {
    batch_size: usize,
    fields: usize,
    buffer_size: usize,
    precision: Precision,
}

/// Builds a batch of line protocol with timestamps written in `config.precision`.
fn generate_batch(config: &Config) -> Result<Vec<u8>, MetricError> {
    let mut builder = Builder::new().with_time_precision(config.precision);
    let mut batch = Vec::new();

    for i in 0..config.batch_size {
        builder.reset();
        builder.set_name("cpu").add_tag("host", format!("host{}", i % 16)).add_tag("region", "us-west");
        for j in 0..config.fields {
            if j % 2 == 0 {
                builder.add_field(format!("field{j}"), (i * j) as f64 / 7.0);
            } else {
                builder.add_field(format!("field{j}"), (i * j) as i64);
            }
        }

        // The builder truncates the time to the precision, so this division is exact.
        let metric = builder.metric()?;
        let time = metric.unix_nano() / config.precision.multiplier();
        let mut line = metric.serialize();
        let suffix_len = metric.unix_nano().to_string().len() + 1;
        line.truncate(line.len() - suffix_len);
        let _ = writeln!(line, "{time}");
        batch.extend_from_slice(&line);
    }

    Ok(batch)
}

struct Generator {
    config: Config,
    batch: Vec<u8>,
    parser: Parser,
    buf: Vec<u8>,
    hist: HdrHistogram<u64>,
    done: Arc<AtomicBool>,
    rate_counter: Arc<AtomicU64>,
}

impl Generator {
    fn new(config: Config, done: Arc<AtomicBool>, rate_counter: Arc<AtomicU64>) -> Result<Generator, MetricError> {
        let batch = generate_batch(&config)?;
        Ok(Generator {
            parser: Parser::new().with_precision(config.precision),
            buf: vec![0; config.buffer_size],
            config,
            batch,
            hist: HdrHistogram::<u64>::new_with_bounds(1, u64::MAX, 3).unwrap(),
            done,
            rate_counter,
        })
    }

    fn run(&mut self) {
        let clock = Clock::new();
        let mut sink = io::sink();

        while !self.done.load(Ordering::Relaxed) {
            let start = clock.now();

            let metrics = match self.parser.parse(&self.batch) {
                Ok(parsed) => parsed.into_metrics(),
                Err(e) => {
                    error!("Failed to parse batch: {}", e);
                    return;
                }
            };

            let rate_counter = self.rate_counter.clone();
            let (tracked, _) = with_group_tracking(metrics, move |info| {
                rate_counter.fetch_add(u64::from(info.accepted()), Ordering::AcqRel);
            });

            let mut reader = Reader::new(tracked);
            loop {
                match reader.read(&mut self.buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let _ = sink.write_all(&self.buf[..n]);
                    }
                    Err(e) => {
                        error!("Failed to read batch: {}", e);
                        return;
                    }
                }
            }
            for metric in reader.into_inner() {
                metric.accept();
            }

            let delta = clock.now() - start;
            self.hist.saturating_record(delta.as_nanos() as u64);
        }
    }
}

impl Drop for Generator {
    fn drop(&mut self) {
        info!(
            "    batch latency ({} metrics): min: {:8} p50: {:8} p95: {:8} p99: {:8} p999: {:8} max: {:8}",
            self.config.batch_size,
            nanos_to_readable(self.hist.min()),
            nanos_to_readable(self.hist.value_at_percentile(50.0)),
            nanos_to_readable(self.hist.value_at_percentile(95.0)),
            nanos_to_readable(self.hist.value_at_percentile(99.0)),
            nanos_to_readable(self.hist.value_at_percentile(99.9)),
            nanos_to_readable(self.hist.max())
        );
    }
}

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

pub fn opts() -> Options {
    let mut opts = Options::new();

    opts.optopt("d", "duration", "number of seconds to run the benchmark", "INTEGER");
    opts.optopt("p", "producers", "number of producers", "INTEGER");
    opts.optopt("b", "batch-size", "number of metrics in each batch", "INTEGER");
    opts.optopt("f", "fields", "number of fields in each metric", "INTEGER");
    opts.optopt("s", "buffer-size", "size in bytes of each read from the encoder", "INTEGER");
    opts.optopt("t", "precision", "precision of the generated timestamps (ns, u, ms, s, m, h)", "STRING");
    opts.optflag("h", "help", "print this help menu");

    opts
}

fn parse_opt<T: std::str::FromStr>(matches: &getopts::Matches, name: &str, default: T) -> Result<T, String> {
    match matches.opt_str(name) {
        Some(s) => s.parse().map_err(|_| format!("invalid value for --{}: {}", name, s)),
        None => Ok(default),
    }
}

fn main() {
    pretty_env_logger::init();

    let args: Vec<String> = env::args().collect();
    let program = &args[0];
    let opts = opts();

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            error!("Failed to parse command line args: {}", f);
            return;
        }
    };

    if matches.opt_present("help") {
        print_usage(program, &opts);
        return;
    }

    info!("telemetry benchmark");

    let settings = (|| {
        let seconds: u64 = parse_opt(&matches, "duration", 60)?;
        let producers: usize = parse_opt(&matches, "producers", 1)?;
        let config = Config {
            batch_size: parse_opt(&matches, "batch-size", 1000)?,
            fields: parse_opt::<usize>(&matches, "fields", 4)?.max(1),
            buffer_size: parse_opt::<usize>(&matches, "buffer-size", 4096)?.max(1),
            precision: matches.opt_str("precision").as_deref().map(Precision::from).unwrap_or_default(),
        };
        Ok::<_, String>((seconds, producers, config))
    })();
    let (seconds, producers, config) = match settings {
        Ok(settings) => settings,
        Err(e) => {
            error!("{}", e);
            return;
        }
    };

    info!("duration: {}s", seconds);
    info!("producers: {}", producers);
    info!("batch size: {} metrics, {} fields each", config.batch_size, config.fields);
    info!("buffer size: {} bytes", config.buffer_size);
    info!("precision: {}", config.precision);

    // Spin up our producers.
    let done = Arc::new(AtomicBool::new(false));
    let rate_counter = Arc::new(AtomicU64::new(0));
    let mut handles = Vec::new();

    for _ in 0..producers {
        let mut gen = match Generator::new(config.clone(), done.clone(), rate_counter.clone()) {
            Ok(gen) => gen,
            Err(e) => {
                error!("Failed to generate input: {}", e);
                return;
            }
        };
        handles.push(thread::spawn(move || gen.run()));
    }

    // Poll the counter to figure out the delivery rate.
    let mut total = 0;
    let mut t0 = Instant::now();

    for _ in 0..seconds {
        thread::sleep(Duration::new(1, 0));
        let t1 = Instant::now();

        let turn_total = rate_counter.load(Ordering::Acquire);
        let turn_delta = turn_total - total;
        total = turn_total;
        let rate = turn_delta as f64 / (t1 - t0).as_secs_f64();

        info!("delivery rate: {:.0} metrics/sec", rate);
        t0 = t1;
    }

    info!("--------------------------------------------------------------------------------");
    info!(" delivered metrics total: {}", total);

    // Wait for the producers to finish so we can get their stats too.
    done.store(true, Ordering::SeqCst);
    for handle in handles {
        let _ = handle.join();
    }
}

fn nanos_to_readable(t: u64) -> String {
    let f = t as f64;
    if f < 1_000.0 {
        format!("{}ns", f)
    } else if f < 1_000_000.0 {
        format!("{:.0}μs", f / 1_000.0)
    } else if f < 2_000_000_000.0 {
        format!("{:.2}ms", f / 1_000_000.0)
    } else {
        format!("{:.3}s", f / 1_000_000_000.0)
    }
}

use getopts::Options;
use hdrhistogram::Histogram as HdrHistogram;
use log::{error, info};
use metrics_exponential::{
    Aggregator, Attributes, Context, HistogramStorage, InstrumentDescriptor, Label, Temporality,
};
use portable_atomic::AtomicU64;
use quanta::{Clock, Instant as QuantaInstant};
use std::{
    env,
    ops::Sub,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

const LOOP_SAMPLE: u64 = 1000;

#[derive(Clone, Copy, PartialEq)]
enum Mode {
    /// Looks up the series on every measurement.
    Lookup,
    /// Binds to the series once and records through the bound handle.
    Bound,
}

struct Generator {
    t0: Option<QuantaInstant>,
    hist: HdrHistogram<u64>,
    storage: Arc<HistogramStorage>,
    series: Vec<Attributes>,
    done: Arc<AtomicBool>,
    rate_counter: Arc<AtomicU64>,
}

impl Generator {
    fn new(
        storage: Arc<HistogramStorage>,
        series: Vec<Attributes>,
        done: Arc<AtomicBool>,
        rate_counter: Arc<AtomicU64>,
    ) -> Generator {
        Generator {
            t0: None,
            hist: HdrHistogram::<u64>::new_with_bounds(1, u64::MAX, 3).unwrap(),
            storage,
            series,
            done,
            rate_counter,
        }
    }

    fn run_lookup(&mut self) {
        let clock = Clock::new();
        let ctx = Context::none();
        let mut loop_counter = 0;

        loop {
            loop_counter += 1;

            let t1 = clock.recent();

            if let Some(t0) = self.t0 {
                let start = if loop_counter % LOOP_SAMPLE == 0 { Some(clock.now()) } else { None };

                let attributes = &self.series[loop_counter as usize % self.series.len()];
                let elapsed = t1.sub(t0).as_nanos() as f64;
                self.storage.record_double(elapsed, attributes, &ctx);
                self.storage.record_long(-(loop_counter as i64 % 1000), attributes, &ctx);

                if let Some(val) = start {
                    let delta = clock.now() - val;
                    self.hist.saturating_record(delta.as_nanos() as u64);

                    // We also increment our global counter for the sample rate here.
                    self.rate_counter.fetch_add(LOOP_SAMPLE * 2, Ordering::AcqRel);

                    if self.done.load(Ordering::Relaxed) {
                        break;
                    }
                }
            }

            self.t0 = Some(t1);
        }
    }

    fn run_bound(&mut self) {
        let clock = Clock::new();
        let ctx = Context::none();
        let mut loop_counter = 0;

        // Rebinds after every sample window, so that collections can reclaim idle handles.
        'outer: loop {
            let attributes = &self.series[loop_counter as usize % self.series.len()];
            let bound = self.storage.bind(attributes);

            loop {
                loop_counter += 1;

                let t1 = clock.recent();

                if let Some(t0) = self.t0 {
                    let start =
                        if loop_counter % LOOP_SAMPLE == 0 { Some(clock.now()) } else { None };

                    let elapsed = t1.sub(t0).as_nanos() as f64;
                    bound.record_double(elapsed, attributes, &ctx);
                    bound.record_long(-(loop_counter as i64 % 1000), attributes, &ctx);

                    if let Some(val) = start {
                        let delta = clock.now() - val;
                        self.hist.saturating_record(delta.as_nanos() as u64);

                        // We also increment our global counter for the sample rate here.
                        self.rate_counter.fetch_add(LOOP_SAMPLE * 2, Ordering::AcqRel);

                        if self.done.load(Ordering::Relaxed) {
                            break 'outer;
                        }

                        self.t0 = Some(t1);
                        break;
                    }
                }

                self.t0 = Some(t1);
            }
        }
    }
}

impl Drop for Generator {
    fn drop(&mut self) {
        info!(
            "    sender latency: min: {:8} p50: {:8} p95: {:8} p99: {:8} p999: {:8} max: {:8}",
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
    opts.optopt(
        "m",
        "mode",
        "whether to look up the series per measurement or record through bound handles",
        "lookup|bound",
    );
    opts.optopt("p", "producers", "number of producers", "INTEGER");
    opts.optopt("s", "series", "number of distinct series to record into", "INTEGER");
    opts.optopt("b", "max-buckets", "maximum number of buckets per histogram", "INTEGER");
    opts.optflag("c", "cumulative", "collect with cumulative temporality instead of delta");
    opts.optflag("h", "help", "print this help menu");

    opts
}

fn parse_opt<T: std::str::FromStr>(matches: &getopts::Matches, name: &str, default: T) -> Option<T> {
    match matches.opt_str(name) {
        None => Some(default),
        Some(raw) => match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                error!("Invalid value for --{}: {}", name, raw);
                None
            }
        },
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

    info!("exponential histogram benchmark");

    let (Some(seconds), Some(producers), Some(series_count), Some(max_buckets)) = (
        parse_opt::<u64>(&matches, "duration", 60),
        parse_opt::<usize>(&matches, "producers", 1),
        parse_opt::<usize>(&matches, "series", 16),
        parse_opt::<usize>(&matches, "max-buckets", 160),
    ) else {
        return;
    };
    let mode = match matches.opt_str("mode").map(|s| s.to_ascii_lowercase()).as_deref() {
        Some("bound") => Mode::Bound,
        _ => Mode::Lookup,
    };
    let temporality =
        if matches.opt_present("cumulative") { Temporality::Cumulative } else { Temporality::Delta };

    info!("duration: {}s", seconds);
    info!("producers: {}", producers);
    info!("series: {}", series_count);

    let aggregator = match Aggregator::builder().with_max_buckets(max_buckets) {
        Ok(builder) => builder.with_temporality(temporality).without_exemplars().build(),
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };
    let storage =
        Arc::new(HistogramStorage::new(InstrumentDescriptor::new("benchmark.latency"), aggregator));
    let series: Vec<Attributes> = (0..series_count.max(1))
        .map(|i| Attributes::from(vec![Label::new("series", i.to_string())]))
        .collect();

    info!("storage configured");

    // Spin up our sample producers.
    let done = Arc::new(AtomicBool::new(false));
    let rate_counter = Arc::new(AtomicU64::new(0));
    let mut handles = Vec::new();

    for _ in 0..producers {
        let d = done.clone();
        let r = rate_counter.clone();
        let storage = storage.clone();
        let series = series.clone();
        let handle = thread::spawn(move || {
            let mut gen = Generator::new(storage, series, d, r);
            match mode {
                Mode::Bound => gen.run_bound(),
                Mode::Lookup => gen.run_lookup(),
            }
        });

        handles.push(handle);
    }

    thread::spawn(|| loop {
        thread::sleep(Duration::from_millis(10));
        quanta::set_recent(quanta::Instant::now());
    });

    // Collect once per second, and use the producers' counter to figure out the sample rate.
    let mut total = 0;
    let mut collected = 0;
    let mut t0 = Instant::now();

    let mut collect_hist = HdrHistogram::<u64>::new_with_bounds(1, u64::MAX, 3).unwrap();
    for _ in 0..seconds {
        let t1 = Instant::now();

        let start = Instant::now();
        let data = storage.collect();
        let end = Instant::now();
        collect_hist.saturating_record(duration_as_nanos(end - start) as u64);
        let batch: u64 = data.data.points.iter().map(|p| p.count).sum();
        collected = match temporality {
            Temporality::Delta => collected + batch,
            Temporality::Cumulative => batch,
        };

        let turn_total = rate_counter.load(Ordering::Acquire);
        let turn_delta = turn_total - total;
        total = turn_total;
        let rate = turn_delta as f64 / (duration_as_nanos(t1 - t0) / 1_000_000_000.0);

        info!(
            "sample ingest rate: {:.0} samples/sec ({} series collected)",
            rate,
            data.data.points.len()
        );
        t0 = t1;
        thread::sleep(Duration::new(1, 0));
    }

    info!("--------------------------------------------------------------------------------");
    info!(" ingested samples total: {}", total);
    info!("collected samples total: {}", collected);
    info!(
        "        collection: min: {:8} p50: {:8} p95: {:8} p99: {:8} p999: {:8} max: {:8}",
        nanos_to_readable(collect_hist.min()),
        nanos_to_readable(collect_hist.value_at_percentile(50.0)),
        nanos_to_readable(collect_hist.value_at_percentile(95.0)),
        nanos_to_readable(collect_hist.value_at_percentile(99.0)),
        nanos_to_readable(collect_hist.value_at_percentile(99.9)),
        nanos_to_readable(collect_hist.max())
    );

    // Wait for the producers to finish so we can get their stats too.
    done.store(true, Ordering::SeqCst);
    for handle in handles {
        let _ = handle.join();
    }
}

fn duration_as_nanos(d: Duration) -> f64 {
    (d.as_secs() as f64 * 1e9) + d.subsec_nanos() as f64
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

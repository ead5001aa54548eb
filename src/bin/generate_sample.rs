//! Writes a small synthetic analysis: signal and background tables, a toy
//! BDT weight file and an `analysis.toml` wiring them together.
//!
//! ```bash
//! cargo run --bin generate_sample -- sample
//! cargo run -- run sample/analysis.toml
//! ```

use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Float64Array, Int32Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use sigscan::classifier::{weights_path, BoostedForest, Boosting, ModelFile, Node, Tree};

const SIGNAL_EVENTS: usize = 2000;
const BACKGROUND_EVENTS: usize = 5000;

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }

    fn exponential(&mut self, mean: f64) -> f64 {
        -mean * self.next_f64().max(1e-15).ln()
    }
}

/// Column-wise event table under construction.
#[derive(Default)]
struct Events {
    kmpt: Vec<f64>,
    kppt: Vec<f64>,
    kmtrkdcasigbs: Vec<f64>,
    kptrkdcasigbs: Vec<f64>,
    bcosalphabs2d: Vec<f64>,
    bmass: Vec<f64>,
    mumumass: Vec<f64>,
    phimass: Vec<f64>,
    jpsi_triggers: Vec<i32>,
}

impl Events {
    fn push_signal(&mut self, rng: &mut SimpleRng) {
        self.kmpt.push(rng.gauss(3.0, 1.0).abs());
        self.kppt.push(rng.gauss(3.0, 1.0).abs());
        self.kmtrkdcasigbs.push(rng.exponential(6.0));
        self.kptrkdcasigbs.push(rng.exponential(6.0));
        self.bcosalphabs2d.push(1.0 - rng.exponential(0.0005));
        self.bmass.push(rng.gauss(5.367, 0.03));
        self.mumumass.push(rng.gauss(3.097, 0.03));
        self.phimass.push(rng.gauss(1.0195, 0.005));
        self.jpsi_triggers.push(i32::from(rng.next_f64() < 0.9));
    }

    fn push_background(&mut self, rng: &mut SimpleRng) {
        self.kmpt.push(rng.exponential(1.2));
        self.kppt.push(rng.exponential(1.2));
        self.kmtrkdcasigbs.push(rng.exponential(2.0));
        self.kptrkdcasigbs.push(rng.exponential(2.0));
        self.bcosalphabs2d.push(1.0 - rng.exponential(0.01));
        self.bmass.push(5.0 + 0.8 * rng.next_f64());
        self.mumumass.push(rng.gauss(3.097, 0.05));
        self.phimass.push(0.99 + 0.06 * rng.next_f64());
        self.jpsi_triggers.push(i32::from(rng.next_f64() < 0.8));
    }

    /// Mark a few records undefined so the exclusion path has something to do.
    fn spoil(&mut self, every: usize) {
        for i in (0..self.kmpt.len()).step_by(every) {
            self.kmpt[i] = f64::NAN;
        }
    }

    fn into_batch(self) -> Result<RecordBatch> {
        let float = |name: &str| Field::new(name, DataType::Float64, true);
        let schema = Arc::new(Schema::new(vec![
            float("Kmpt"),
            float("Kppt"),
            float("Kmtrkdcasigbs"),
            float("Kptrkdcasigbs"),
            float("Bcosalphabs2d"),
            float("Bmass"),
            float("Mumumass"),
            float("Phimass"),
            Field::new("JpsiTriggers", DataType::Int32, true),
        ]));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Float64Array::from(self.kmpt)),
            Arc::new(Float64Array::from(self.kppt)),
            Arc::new(Float64Array::from(self.kmtrkdcasigbs)),
            Arc::new(Float64Array::from(self.kptrkdcasigbs)),
            Arc::new(Float64Array::from(self.bcosalphabs2d)),
            Arc::new(Float64Array::from(self.bmass)),
            Arc::new(Float64Array::from(self.mumumass)),
            Arc::new(Float64Array::from(self.phimass)),
            Arc::new(Int32Array::from(self.jpsi_triggers)),
        ];
        RecordBatch::try_new(schema, columns).context("building record batch")
    }
}

fn write_parquet(path: &Path, batch: &RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

/// Three stumps on the derived features; positive leaves are signal-like.
fn toy_bdt() -> BoostedForest {
    let stump = |feature: usize, threshold: f64, weight: f64| Tree {
        weight,
        nodes: vec![
            Node::Split {
                feature,
                threshold,
                left: 1,
                right: 2,
            },
            Node::Leaf { value: -1.0 },
            Node::Leaf { value: 1.0 },
        ],
    };
    BoostedForest {
        method: "BDT".into(),
        inputs: vec!["maxkpt".into(), "maxktrk".into(), "Bcosalphabs2d".into()],
        boosting: Boosting::Adaptive,
        trees: vec![
            stump(0, 2.5, 1.0),
            stump(1, 4.0, 0.7),
            stump(2, 0.998, 0.5),
        ],
    }
}

const ANALYSIS: &str = r#"[signal]
path = "signal.parquet"

[background]
path = "background.parquet"

[derive]
require = ["Bmass", "Mumumass"]

[[derive.fields]]
name = "maxkpt"
expr = "max(Kmpt, Kppt)"

[[derive.fields]]
name = "maxktrk"
expr = "max(Kmtrkdcasigbs, Kptrkdcasigbs)"

[models]
dir = "weights"

[models.methods]
BDT = true

[cuts]
signal = "JpsiTriggers == 1 && Phimass > 1.0095 && Phimass < 1.0295"
background = "JpsiTriggers == 1 && Phimass > 1.0095 && Phimass < 1.0295 && (Bmass < 5.25 || Bmass > 5.5)"

[scan]
score = "BDT"
lo = -1.0
hi = 1.0
steps = 200
scale = 0.012874

[output]
curve = "out/fom.csv"
report = "out/report.json"
selected_signal = "out/signal_selected.parquet"
selected_background = "out/background_selected.parquet"
"#;

fn main() -> Result<()> {
    let out = std::env::args().nth(1).unwrap_or_else(|| "sample".to_string());
    let out = Path::new(&out);
    fs::create_dir_all(out.join("weights"))
        .with_context(|| format!("creating {}", out.display()))?;

    let mut rng = SimpleRng::new(42);

    let mut signal = Events::default();
    for _ in 0..SIGNAL_EVENTS {
        signal.push_signal(&mut rng);
    }
    signal.spoil(97);
    write_parquet(&out.join("signal.parquet"), &signal.into_batch()?)?;

    let mut background = Events::default();
    for _ in 0..BACKGROUND_EVENTS {
        background.push_background(&mut rng);
    }
    background.spoil(211);
    write_parquet(&out.join("background.parquet"), &background.into_batch()?)?;

    let model = serde_json::to_string_pretty(&ModelFile::Forest(toy_bdt()))?;
    fs::write(weights_path(&out.join("weights"), "TMVAClassification", "BDT"), model)?;
    fs::write(out.join("analysis.toml"), ANALYSIS)?;

    println!(
        "Wrote {SIGNAL_EVENTS} signal and {BACKGROUND_EVENTS} background events to {}",
        out.display()
    );
    Ok(())
}

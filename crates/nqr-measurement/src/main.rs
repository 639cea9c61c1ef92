//! nqr-measure: acquire, process and inspect NQR measurements from the shell

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use nqr_core::{parse_averages, parse_frequency_mhz, Measurement, FILE_EXTENSION};
use nqr_measurement::{
    start_measurement_service, ModuleCommand, ModuleUpdate, NotificationLevel, PlotData, ViewMode,
};
use nqr_processing::{model_by_name, Function, ProcessingConfig};
use nqr_simulation::{DecayEnvelope, FidConfig, SpectrometerConfig};
use std::path::{Path, PathBuf};
use tokio::time::{timeout, Duration};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "nqr-measure")]
#[command(version)]
#[command(about = "Acquire and post-process NQR measurements", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Acquire a measurement from the simulated spectrometer
    Acquire {
        /// Measurement frequency in MHz
        #[arg(short, long)]
        frequency: String,
        /// Number of averages
        #[arg(short, long, default_value = "100")]
        averages: String,
        /// Output file, defaults to a timestamped name
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Number of points of the simulated FID
        #[arg(long, default_value_t = 1024)]
        points: usize,
        /// T2* of the simulated FID in microseconds
        #[arg(long, default_value_t = 50.0)]
        t2star: f64,
        /// Single-scan noise level of the simulated FID
        #[arg(long, default_value_t = 0.05)]
        noise: f64,
        /// Seed for reproducible noise
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Apodize a measurement with a window function
    Apodize {
        input: PathBuf,
        /// Window function name (FID, Gaussian, Lorentzian, Rect, Sinc, Custom)
        #[arg(short, long, default_value = "FID")]
        function: String,
        /// Expression of a custom function, in terms of `x`
        #[arg(short, long)]
        expression: Option<String>,
        /// Function parameters as SYMBOL=VALUE
        #[arg(short, long = "param", value_name = "SYMBOL=VALUE")]
        params: Vec<String>,
        /// Evaluate the function over the time axis in microseconds
        #[arg(long)]
        span_time_axis: bool,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Fit a model to a measurement and store the result in the file
    Fit {
        input: PathBuf,
        /// Fit model (T2*, Lorentzian)
        #[arg(short, long, default_value = "T2*")]
        model: String,
        /// Output file, defaults to the input
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the plot series of a measurement as CSV
    Show {
        input: PathBuf,
        #[arg(short, long, value_enum, default_value_t = View::Time)]
        view: View,
    },
    /// Run a processing pipeline on a measurement
    Pipeline {
        input: PathBuf,
        /// Pipeline name
        #[arg(short, long, default_value = "fid_apodization")]
        name: String,
        /// Processing configuration (JSON), defaults to the presets
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print the preset processing configuration as JSON
    Presets,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum View {
    Time,
    Fft,
}

impl From<View> for ViewMode {
    fn from(view: View) -> Self {
        match view {
            View::Time => ViewMode::Time,
            View::Fft => ViewMode::Fft,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Acquire { frequency, averages, output, points, t2star, noise, seed } => {
            let fid = FidConfig {
                points,
                envelope: DecayEnvelope::Exponential { t2star_us: t2star },
                noise_std: noise,
                seed,
                ..FidConfig::default()
            };
            let output = output.unwrap_or_else(default_output);
            acquire(fid, &frequency, &averages, &output).await
        }
        Command::Apodize { input, function, expression, params, span_time_axis, output } => {
            let measurement = load(&input)?;
            let mut function = build_function(&function, expression.as_deref(), &params)?;
            if span_time_axis {
                function.span_time_axis(measurement.duration_us())?;
            }
            let apodized = nqr_processing::apodize(&measurement, &function)?;
            save(&apodized, &output)
        }
        Command::Fit { input, model, output } => {
            let mut measurement = load(&input)?;
            let model = model_by_name(&model).ok_or_else(|| anyhow!("unknown fit model '{}'", model))?;
            let record = nqr_processing::fit(&measurement, model.as_ref())
                .with_context(|| format!("{} fit of {}", model.name(), input.display()))?;

            let errors = record.standard_errors();
            println!("{} fit ({} domain)", record.name, record.domain);
            for (param, error) in record.parameters.iter().zip(errors) {
                println!("  {:<8} = {:.6} ± {:.6}", param.name, param.value, error);
            }

            measurement.add_fit(record);
            save(&measurement, output.as_deref().unwrap_or(&input))
        }
        Command::Show { input, view } => {
            let measurement = load(&input)?;
            print!("{}", PlotData::from_measurement(&measurement, view.into()).to_csv());
            Ok(())
        }
        Command::Pipeline { input, name, config, output } => {
            let measurement = load(&input)?;
            let config = match config {
                Some(path) => ProcessingConfig::load(&path)
                    .with_context(|| format!("loading processing config {}", path.display()))?,
                None => ProcessingConfig::presets(),
            };

            let mut pipeline = config.build_pipeline(&name)?;
            let result = pipeline.process(&measurement)?;
            for warning in &result.warnings {
                warn!("{}", warning);
            }
            info!(
                "Pipeline '{}' finished in {} µs ({} processors)",
                name,
                result.total_latency_us,
                pipeline.len()
            );
            for fit in result.output.fits() {
                println!("{}: {:?}", fit.name, fit.parameters);
            }
            save(&result.output, &output)
        }
        Command::Presets => {
            println!("{}", ProcessingConfig::presets().to_json()?);
            Ok(())
        }
    }
}

/// Drive the simulated spectrometer through the measurement service
async fn acquire(fid: FidConfig, frequency: &str, averages: &str, output: &Path) -> Result<()> {
    parse_frequency_mhz(frequency).context("invalid frequency")?;
    parse_averages(averages).context("invalid number of averages")?;

    let config = SpectrometerConfig { fid, ..SpectrometerConfig::default() };
    let (mut updates, commands, handle) = start_measurement_service(config)?;

    let send = [
        ModuleCommand::SetFrequency { valid: true, text: frequency.to_string() },
        ModuleCommand::SetAverages { valid: true, text: averages.to_string() },
        ModuleCommand::StartMeasurement,
    ];
    for command in send {
        commands.send(command).await.context("measurement service stopped")?;
    }

    let outcome = timeout(Duration::from_secs(60), async {
        loop {
            match updates.recv().await {
                Ok(ModuleUpdate::Displayed(measurement)) => return Ok(measurement),
                Ok(ModuleUpdate::Notification(n)) if n.level == NotificationLevel::Error => {
                    return Err(anyhow!("{}", n.message));
                }
                Ok(ModuleUpdate::SpectrometerLabel(label)) => info!("{}", label),
                Ok(_) => {}
                Err(e) => return Err(anyhow!("measurement service stopped: {}", e)),
            }
        }
    })
    .await;

    commands.send(ModuleCommand::Shutdown).await.ok();
    let controller = handle.await.context("measurement service panicked")?;
    info!("{} measurement(s) in history", controller.model().measurements().len());

    let measurement = match outcome {
        Ok(result) => result?,
        Err(_) => bail!("no measurement received"),
    };

    println!(
        "{}: {} samples, dwell {} µs",
        measurement.name,
        measurement.len(),
        measurement.dwell_time_us()
    );
    save(&measurement, output)
}

fn build_function(name: &str, expression: Option<&str>, params: &[String]) -> Result<Function> {
    let mut function = match expression {
        Some(expression) => Function::custom(expression)?,
        None => Function::by_name(name).ok_or_else(|| anyhow!("unknown function '{}'", name))?,
    };
    let custom = expression.is_some();

    for param in params {
        let (symbol, value) = param
            .split_once('=')
            .ok_or_else(|| anyhow!("parameter '{}' is not SYMBOL=VALUE", param))?;
        let value: f64 = value
            .trim()
            .parse()
            .with_context(|| format!("parameter '{}' has no numeric value", symbol))?;

        if custom && function.parameter(symbol.trim()).is_none() {
            function.add_parameter(symbol.trim(), symbol.trim(), value)?;
        } else {
            function.set_parameter(symbol.trim(), value)?;
        }
    }

    Ok(function)
}

fn load(path: &Path) -> Result<Measurement> {
    Measurement::load(path).with_context(|| format!("loading {}", path.display()))
}

fn save(measurement: &Measurement, path: &Path) -> Result<()> {
    measurement
        .save(path)
        .with_context(|| format!("saving {}", path.display()))?;
    info!("Wrote {}", path.display());
    Ok(())
}

fn default_output() -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    PathBuf::from(format!("measurement_{}.{}", stamp, FILE_EXTENSION))
}

use app_helpers::pipeline::{Pipeline, PipelineSettings};
use app_helpers::sample_format::{SampleFormat, encode_f32};
use plsync::interpolators::InterpolatorKind;
use plsync::plsync::PlSyncEvent;
use std::io::{Read, Write, BufWriter};
use std::sync::mpsc::sync_channel;
use num::complex::Complex32;
use clap::{Parser, ValueEnum};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum InputFormat {
    /// Interleaved 32bit little endian floats
    F32,
    /// Interleaved offset binary bytes
    U8,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum InterpolatorArg {
    Polyphase,
    Linear,
    Quadratic,
    Cubic,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct AppArguments {
    /// Format of the input IQ samples
    #[arg(short, long, value_enum, default_value_t = InputFormat::F32)]
    format: InputFormat,
    /// Number of samples to read in chunks from input file
    #[arg(short, long, default_value_t = 8192)]
    number_of_input_samples: usize,
    /// Input filepath. If not provided uses stdin by default.
    #[arg(short, long)]
    input_filepath: Option<String>,
    /// Output filepath. If not provided uses stdout by default.
    #[arg(short, long)]
    output_filepath: Option<String>,
    /// JSON file with pipeline settings. The options below take precedence.
    #[arg(short, long)]
    config: Option<String>,
    /// Samples per symbol. Must be an even integer.
    #[arg(long)]
    sps: Option<f32>,
    /// Gold code of the physical layer scrambler
    #[arg(long)]
    gold_code: Option<u32>,
    /// Normalised loop bandwidth of the symbol timing recovery
    #[arg(long)]
    loop_bw: Option<f32>,
    /// Rolloff factor of the matched filter
    #[arg(long)]
    rolloff: Option<f32>,
    /// Interpolator used by the symbol timing recovery
    #[arg(long, value_enum)]
    interpolator: Option<InterpolatorArg>,
    /// Print the resolved settings as JSON and exit
    #[arg(long)]
    print_settings: bool,
}

fn main() -> Result<(), String> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = AppArguments::parse();

    // Parse arguments
    let number_of_input_samples = match args.number_of_input_samples {
        length if length == 0 => return Err("Number of input samples cannot be zero.".into()),
        length => length,
    };
    let sample_format = match args.format {
        InputFormat::F32 => SampleFormat::F32,
        InputFormat::U8 => SampleFormat::U8,
    };
    let settings = load_settings(&args)?;
    if args.print_settings {
        let json = serde_json::to_string_pretty(&settings).map_err(|err| format!("Failed to serialise settings: {}", err))?;
        println!("{}", json);
        return Ok(());
    }

    let mut pipeline = Pipeline::new(settings).map_err(|err| format!("Invalid pipeline settings: {}", err))?;
    let mut input_file: Box<dyn Read + Send + Sync> = match &args.input_filepath {
        None => Box::new(std::io::stdin()),
        Some(filepath) => match std::fs::File::open(filepath) {
            Ok(file) => Box::new(file),
            Err(err) => return Err(format!("Failed to open input file {}: {}", filepath, err)),
        },
    };
    let mut output_file: Box<dyn Write + Send + Sync> = match &args.output_filepath {
        None => Box::new(BufWriter::new(std::io::stdout())),
        Some(filepath) => match std::fs::File::create(filepath) {
            Ok(file) => Box::new(BufWriter::new(file)),
            Err(err) => return Err(format!("Failed to open file {}: {}", filepath, err)),
        },
    };

    // Setup input and output buffers
    let bytes_per_sample = sample_format.bytes_per_sample();
    let mut input_bytes_buffer = vec![0u8; number_of_input_samples*bytes_per_sample];
    let mut input_samples_buffer = vec![Complex32::default(); number_of_input_samples];
    let (output_tx, output_rx) = sync_channel::<Vec<u8>>(8);

    // Setup threads
    let reader_thread = std::thread::spawn(move || {
        let mut output_symbols = Vec::new();
        let mut nb_pending_bytes = 0;
        loop {
            let nb_bytes = match input_file.read(&mut input_bytes_buffer[nb_pending_bytes..]) {
                Ok(0) => {
                    log::info!("[reader_thread] Finished reading samples from input");
                    break;
                },
                Ok(length) => nb_pending_bytes + length,
                Err(err) => {
                    log::error!("[reader_thread] Error while reading from input: {}", err);
                    break;
                },
            };
            let total_samples = sample_format.decode(&input_bytes_buffer[..nb_bytes], &mut input_samples_buffer);
            // Keep bytes of an incomplete sample for the next read
            let nb_used_bytes = total_samples*bytes_per_sample;
            input_bytes_buffer.copy_within(nb_used_bytes..nb_bytes, 0);
            nb_pending_bytes = nb_bytes - nb_used_bytes;

            pipeline.process(&input_samples_buffer[..total_samples], &mut output_symbols);
            pipeline.drain_events().for_each(|event| log_event(&event));
            if output_symbols.is_empty() {
                continue;
            }
            let mut data_out = Vec::new();
            encode_f32(&output_symbols, &mut data_out);
            output_symbols.clear();
            if let Err(err) = output_tx.send(data_out) {
                log::error!("[reader_thread] Writer thread stopped responding: {}", err);
                break;
            }
        }
        let counters = pipeline.plsync().counters();
        log::info!(
            "[reader_thread] Processed {} symbols with {} headers, {} frames, {} rejected and {} dummy",
            pipeline.nb_symbols(), counters.nb_sof, counters.nb_frames, counters.nb_rejected, counters.nb_dummy,
        );
    });

    let writer_thread = std::thread::spawn(move || {
        // Channel closes once the reader thread exits
        for data_out in output_rx.iter() {
            if let Err(err) = output_file.write_all(&data_out) {
                log::error!("[writer_thread] Error while writing to output: {}", err);
                return;
            }
        }
        if let Err(err) = output_file.flush() {
            log::error!("[writer_thread] Error while flushing output: {}", err);
        } else {
            log::info!("[writer_thread] Successfully flushed output");
        }
    });

    // Handle closing
    if let Err(err) = reader_thread.join() {
        log::error!("[main_thread] Reader thread should terminate gracefully: {:?}", err);
    };
    if let Err(err) = writer_thread.join() {
        log::error!("[main_thread] Writer thread should terminate gracefully: {:?}", err);
    }
    Ok(())
}

fn load_settings(args: &AppArguments) -> Result<PipelineSettings, String> {
    let mut settings = match &args.config {
        None => PipelineSettings::default(),
        Some(filepath) => {
            let text = std::fs::read_to_string(filepath)
                .map_err(|err| format!("Failed to read config file {}: {}", filepath, err))?;
            serde_json::from_str(&text)
                .map_err(|err| format!("Failed to parse config file {}: {}", filepath, err))?
        },
    };

    if let Some(sps) = args.sps {
        settings.symbol_sync.sps = sps;
        settings.plsync.sps = sps;
    }
    if let Some(gold_code) = args.gold_code {
        settings.plsync.gold_code = gold_code;
    }
    if let Some(loop_bw) = args.loop_bw {
        settings.symbol_sync.loop_bw = loop_bw;
    }
    if let Some(rolloff) = args.rolloff {
        settings.symbol_sync.rolloff = rolloff;
    }
    if let Some(interpolator) = args.interpolator {
        settings.symbol_sync.interpolator = match interpolator {
            InterpolatorArg::Polyphase => InterpolatorKind::Polyphase,
            InterpolatorArg::Linear => InterpolatorKind::Linear,
            InterpolatorArg::Quadratic => InterpolatorKind::Quadratic,
            InterpolatorArg::Cubic => InterpolatorKind::Cubic,
        };
    }
    Ok(settings)
}

fn log_event(event: &PlSyncEvent) {
    match event {
        PlSyncEvent::FrameStart(frame) => log::info!(
            "[reader_thread] Frame start: {{ output: {}, modcod: {}, short: {}, pilots: {}, locked: {}, demap: {:?} }}",
            frame.output_offset, frame.modcod, frame.is_short_fecframe, frame.has_pilots, frame.is_locked, frame.demap_mode,
        ),
        PlSyncEvent::RotatorCommand(command) => log::debug!(
            "[reader_thread] Rotator command: {{ phase_inc: {:.4e}, sample: {} }}",
            command.phase_inc, command.sample_offset,
        ),
    }
}

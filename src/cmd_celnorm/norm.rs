use clap::*;
use std::io::Write;
use std::path::Path;

use celnorm::libs::cel::CelFile;
use celnorm::libs::meta::{read_probe_list, read_probe_meta, ColSpec};
use celnorm::libs::mixture::FitOpts;
use celnorm::libs::normalize::{normalize, NormOpts};

pub fn make_subcommand() -> Command {
    Command::new("norm")
        .about("Normalize probe intensities of one scan file against sequence background")
        .arg(
            Arg::new("infile")
                .required(true)
                .index(1)
                .help("Input scan file (CEL v4)"),
        )
        .arg(
            Arg::new("meta")
                .long("meta")
                .short('m')
                .required(true)
                .num_args(1)
                .help("Probe metadata table, tab-delimited with a header row"),
        )
        .arg(
            Arg::new("cols")
                .long("cols")
                .num_args(1)
                .default_value("0/1/2/3")
                .help("Metadata column indices as id/x/y/seq"),
        )
        .arg(
            Arg::new("model")
                .long("model")
                .num_args(1)
                .help("Model-probe allow-list, one probe ID per line; restricts fitting only"),
        )
        .arg(
            Arg::new("sample")
                .long("sample")
                .num_args(1)
                .default_value("50000")
                .value_parser(value_parser!(usize))
                .help("Cap on probes used for model fitting"),
        )
        .arg(
            Arg::new("bins")
                .long("bins")
                .num_args(1)
                .default_value("25")
                .value_parser(value_parser!(usize))
                .help("Variance bins for the mixture fit"),
        )
        .arg(
            Arg::new("group")
                .long("group")
                .num_args(1)
                .default_value("5000")
                .value_parser(value_parser!(usize))
                .help("Group size for local residual deviations"),
        )
        .arg(
            Arg::new("tol")
                .long("tol")
                .num_args(1)
                .default_value("0.01")
                .value_parser(value_parser!(f64))
                .help("EM convergence tolerance"),
        )
        .arg(
            Arg::new("max-iters")
                .long("max-iters")
                .num_args(1)
                .default_value("1000")
                .value_parser(value_parser!(usize))
                .help("EM iteration cap; the fit at the cap is used as-is"),
        )
        .arg(
            Arg::new("outfile")
                .long("outfile")
                .short('o')
                .num_args(1)
                .default_value("stdout")
                .help("Output filename. [stdout] for screen"),
        )
        .after_help(
            r###"
Output is tab-delimited, sorted by probe ID:
  probe ID, normalized value, posterior signal probability

An existing output file is left untouched; the run is skipped.

Examples:
  # Normalize with annotations in the default column layout
  celnorm norm scan.cel --meta probes.tsv -o scan.norm.tsv

  # Annotation dump with probe ID in column 0, coordinates in 2/3,
  # sequence in 5; restrict fitting to a probe subset
  celnorm norm scan.cel --meta probes.tsv --cols 0/2/3/5 --model model.list -o scan.norm.tsv
"###,
        )
}

// command implementation
pub fn execute(args: &ArgMatches) -> anyhow::Result<()> {
    //----------------------------
    // Args
    //----------------------------
    let infile = args.get_one::<String>("infile").unwrap();
    let metafile = args.get_one::<String>("meta").unwrap();
    let outfile = args.get_one::<String>("outfile").unwrap();
    let cols: ColSpec = args.get_one::<String>("cols").unwrap().parse()?;

    let opts = NormOpts {
        sample_cap: *args.get_one::<usize>("sample").unwrap(),
        group_size: *args.get_one::<usize>("group").unwrap(),
        fit: FitOpts {
            bins: *args.get_one::<usize>("bins").unwrap(),
            tol: *args.get_one::<f64>("tol").unwrap(),
            max_iters: *args.get_one::<usize>("max-iters").unwrap(),
            ..Default::default()
        },
    };

    // One scan file is processed atomically or not at all; an existing
    // output means a previous run already finished
    if outfile != "stdout" && Path::new(outfile).exists() {
        eprintln!("Already processed {}", outfile);
        return Ok(());
    }

    //----------------------------
    // Load inputs
    //----------------------------
    eprintln!("Reading annotations from {}", metafile);
    let meta = read_probe_meta(metafile, &cols)?;

    eprintln!("Reading {}", infile);
    let cel = CelFile::open(infile)?;
    let intensities = cel.read_intensities(&meta.coord_of)?;

    let model_probes = match args.get_one::<String>("model") {
        Some(path) if Path::new(path).exists() => {
            eprintln!("Reading model probe list from {}", path);
            Some(read_probe_list(path)?)
        }
        Some(path) => {
            eprintln!("No model probe list exists at {}", path);
            None
        }
        None => None,
    };

    //----------------------------
    // Fit and score
    //----------------------------
    eprintln!("Normalizing {} probes", meta.seq_of.len());
    let mut results = normalize(&intensities, &meta.seq_of, model_probes.as_ref(), &opts)?;
    results.sort_by(|a, b| a.probe_id.cmp(&b.probe_id));

    //----------------------------
    // Output
    //----------------------------
    let mut writer = celnorm::writer(outfile);
    for res in &results {
        writer.write_all(
            format!("{}\t{:.9}\t{:.9}\n", res.probe_id, res.normalized, res.posterior).as_bytes(),
        )?;
    }

    Ok(())
}

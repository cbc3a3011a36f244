use clap::*;
use std::io::Write;

use celnorm::libs::cel::CelFile;

pub fn make_subcommand() -> Command {
    Command::new("info")
        .about("Print the header block of a scan file")
        .after_help(
            r###"
Decodes the fixed header of a CEL v4 scan file without touching the cell
grid: grid dimensions, quantification algorithm and its parameters, and the
outlier/masked cell summaries.

Examples:
  celnorm info scan.cel
"###,
        )
        .arg(
            Arg::new("infile")
                .required(true)
                .index(1)
                .help("Input scan file (CEL v4)"),
        )
        .arg(
            Arg::new("outfile")
                .long("outfile")
                .short('o')
                .num_args(1)
                .default_value("stdout")
                .help("Output filename. [stdout] for screen"),
        )
}

// command implementation
pub fn execute(args: &ArgMatches) -> anyhow::Result<()> {
    let infile = args.get_one::<String>("infile").unwrap();
    let outfile = args.get_one::<String>("outfile").unwrap();

    let cel = CelFile::open(infile)?;
    let h = &cel.header;

    let mut writer = celnorm::writer(outfile);
    writer.write_all(
        format!(
            "version\t{}\n\
             columns\t{}\n\
             rows\t{}\n\
             cells\t{}\n\
             algorithm\t{}\n\
             parameters\t{}\n\
             cell_margin\t{}\n\
             outlier_cells\t{}\n\
             masked_cells\t{}\n\
             subgrids\t{}\n",
            h.version,
            h.columns,
            h.rows,
            h.cells,
            h.algorithm,
            h.parameters,
            h.cell_margin,
            h.outlier_cells,
            h.masked_cells,
            h.subgrids
        )
        .as_bytes(),
    )?;

    Ok(())
}

extern crate clap;
use clap::*;

mod cmd_celnorm;

fn main() -> anyhow::Result<()> {
    let app = Command::new("celnorm")
        .version(crate_version!())
        .author(crate_authors!())
        .about("`celnorm` - sequence-based background normalization for array scan files")
        .propagate_version(true)
        .arg_required_else_help(true)
        .color(ColorChoice::Auto)
        .subcommand(cmd_celnorm::norm::make_subcommand())
        .subcommand(cmd_celnorm::info::make_subcommand())
        .after_help(
            r###"Subcommands:

* norm - normalize probe intensities of one scan file
* info - print the header block of a scan file

"###,
        );

    // Check which subcomamnd the user ran...
    match app.get_matches().subcommand() {
        Some(("norm", sub_matches)) => cmd_celnorm::norm::execute(sub_matches),
        Some(("info", sub_matches)) => cmd_celnorm::info::execute(sub_matches),
        _ => unreachable!(),
    }?;

    Ok(())
}

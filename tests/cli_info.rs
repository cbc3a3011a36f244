use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;
use tempfile::TempDir;

fn push_text(data: &mut Vec<u8>, text: &str) {
    data.extend_from_slice(&(text.len() as i32).to_le_bytes());
    data.extend_from_slice(text.as_bytes());
}

fn create_cel_data() -> Vec<u8> {
    let mut data = Vec::new();

    data.extend_from_slice(&64i32.to_le_bytes());
    data.extend_from_slice(&4i32.to_le_bytes());
    data.extend_from_slice(&2i32.to_le_bytes()); // columns
    data.extend_from_slice(&3i32.to_le_bytes()); // rows
    data.extend_from_slice(&6i32.to_le_bytes()); // cells

    push_text(&mut data, "[CEL]\nVersion=4");
    push_text(&mut data, "Percentile");
    push_text(&mut data, "Percentile:75;CellMargin:2");

    data.extend_from_slice(&2i32.to_le_bytes()); // cell margin
    data.extend_from_slice(&7u32.to_le_bytes()); // outlier cells
    data.extend_from_slice(&1u32.to_le_bytes()); // masked cells
    data.extend_from_slice(&0i32.to_le_bytes()); // subgrids

    for i in 0..6 {
        data.extend_from_slice(&(100.0f32 + i as f32).to_le_bytes());
        data.extend_from_slice(&5.0f32.to_le_bytes());
        data.extend_from_slice(&9i16.to_le_bytes());
    }

    data
}

#[test]
fn command_info() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let cel = temp.path().join("scan.cel");
    std::fs::write(&cel, create_cel_data())?;

    let mut cmd = Command::cargo_bin("celnorm")?;
    let output = cmd.arg("info").arg(&cel).output()?;
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("version\t4"));
    assert!(stdout.contains("columns\t2"));
    assert!(stdout.contains("rows\t3"));
    assert!(stdout.contains("cells\t6"));
    assert!(stdout.contains("algorithm\tPercentile"));
    assert!(stdout.contains("parameters\tPercentile:75;CellMargin:2"));
    assert!(stdout.contains("outlier_cells\t7"));
    assert!(stdout.contains("masked_cells\t1"));

    Ok(())
}

#[test]
fn command_info_truncated() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let cel = temp.path().join("scan.cel");

    let mut data = create_cel_data();
    data.truncate(30); // cut inside the header text block
    std::fs::write(&cel, &data)?;

    let mut cmd = Command::cargo_bin("celnorm")?;
    cmd.arg("info").arg(&cel).assert().failure();

    Ok(())
}

#[test]
fn command_info_cell_count_mismatch() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let cel = temp.path().join("scan.cel");

    let mut data = create_cel_data();
    data[16..20].copy_from_slice(&7i32.to_le_bytes());
    std::fs::write(&cel, &data)?;

    let mut cmd = Command::cargo_bin("celnorm")?;
    cmd.arg("info")
        .arg(&cel)
        .assert()
        .failure()
        .stderr(predicate::str::contains("mismatch"));

    Ok(())
}

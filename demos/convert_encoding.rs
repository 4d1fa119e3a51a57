/// Encoding Conversion Example
///
/// This example demonstrates:
/// - Detecting the code page of a DBF file
/// - Converting it from Windows ANSI to DOS OEM in place
/// - Checking that the header bytes were left alone

use dbf_commander::{convert, detect_encoding, Codepage, DbfHeader};

/// A one-field DBF image holding "Café" and "Müller" in cp1252
fn sample_dbf() -> Vec<u8> {
    let mut bytes = vec![0u8; 32];
    bytes[0] = 0x03;
    bytes[4] = 2;
    bytes[8] = 65;
    bytes[10] = 9;

    let mut field = [0u8; 32];
    field[..4].copy_from_slice(b"NAME");
    field[11] = b'C';
    field[16] = 8;
    bytes.extend_from_slice(&field);
    bytes.push(0x0D);

    bytes.extend_from_slice(b" Caf\xe9    ");
    bytes.extend_from_slice(b" M\xfcller  ");
    bytes.push(0x1A);
    bytes
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== DBF Commander Encoding Example ===\n");

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("names.dbf");
    std::fs::write(&path, sample_dbf())?;

    // 1. Inspect
    let header = DbfHeader::read(&path)?;
    println!("1. {} records, header {} bytes", header.record_count, header.header_length);
    println!("   Detected encoding: {}\n", detect_encoding(&path)?);

    // 2. Convert
    println!("2. Converting {} -> {}...", Codepage::Cp1252, Codepage::Cp437);
    let before = std::fs::read(&path)?;
    let report = convert(&path, Codepage::Cp1252, Codepage::Cp437, true)?;
    println!("   {} -> {} bytes, lossy: {}", report.bytes_before, report.bytes_after, report.lossy);
    if let Some(backup) = &report.backup {
        println!("   Backup: {}", backup.display());
    }

    // 3. Verify
    let after = std::fs::read(&path)?;
    let header_len = report.header_length;
    println!("\n3. Header unchanged: {}", before[..header_len] == after[..header_len]);
    let data = &after[header_len..];
    println!("   First record now reads {:?} as cp437", Codepage::Cp437.decode_lossy(&data[1..9]));

    println!("\n=== Example Complete ===");
    Ok(())
}

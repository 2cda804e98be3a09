use gpman_pcsc::{PcscError, PcscTerminal};

/// List all available readers
pub(crate) fn list_readers(terminal: &PcscTerminal) -> Result<(), PcscError> {
    let readers = match terminal.readers() {
        Ok(readers) => readers,
        Err(PcscError::NoReadersAvailable) => Vec::new(),
        Err(e) => return Err(e),
    };

    if readers.is_empty() {
        println!("No readers found!");
        return Ok(());
    }

    println!("Available readers:");
    for (i, reader) in readers.iter().enumerate() {
        let status = match reader.atr() {
            Some(atr) if reader.has_card() => format!("card present, ATR {}", hex::encode_upper(atr)),
            _ if reader.has_card() => "card present".to_owned(),
            _ => "no card".to_owned(),
        };
        println!("{}. {} ({})", i + 1, reader.name(), status);
    }

    Ok(())
}

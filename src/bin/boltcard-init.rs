//! Configuration bootstrap for the tag emulator
//!
//! Generates fresh card keys and a UID, persists the configuration to the
//! JSON store, and prints what a withdraw server operator needs to enroll
//! the card. Keys are printed exactly once, here; the emulator itself
//! never emits them.
//!
//! Usage: boltcard-init <card-id> <lnurl-base> [storage-dir]

use std::env;
use std::path::PathBuf;
use std::process;

use boltcard_emu::{CardConfig, ConfigStore, JsonConfigStore};

fn usage() -> ! {
    eprintln!("usage: boltcard-init <card-id> <lnurl-base> [storage-dir]");
    eprintln!();
    eprintln!("  card-id      URL path segment identifying this card");
    eprintln!("  lnurl-base   base URL of the withdraw server, e.g. https://pay.example.com/ln");
    eprintln!("  storage-dir  where to write card_config.json (default: ~/.boltcard-emu)");
    process::exit(2);
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let (card_id, lnurl_base, storage_dir) = match args.as_slice() {
        [card_id, lnurl_base] => (card_id.clone(), lnurl_base.clone(), None),
        [card_id, lnurl_base, dir] => {
            (card_id.clone(), lnurl_base.clone(), Some(PathBuf::from(dir)))
        }
        _ => usage(),
    };

    let config = CardConfig::generate(&card_id, &lnurl_base);
    if let Err(e) = config.validate() {
        eprintln!("error: invalid configuration: {}", e);
        process::exit(1);
    }

    let mut store = JsonConfigStore::new(storage_dir);
    match store.load() {
        Ok(Some(existing)) => {
            eprintln!(
                "error: a card ({}) is already configured; remove it first",
                existing.card_id
            );
            process::exit(1);
        }
        Ok(None) => {}
        Err(e) => {
            eprintln!("error: failed to read existing configuration: {}", e);
            process::exit(1);
        }
    }

    if let Err(e) = store.save(&config) {
        eprintln!("error: failed to save configuration: {}", e);
        process::exit(1);
    }

    println!("card configured");
    println!("  card id:    {}", config.card_id);
    println!("  UID:        {}", hex::encode_upper(config.uid));
    println!("  K0:         {}", hex::encode_upper(config.k0));
    println!("  K1 (enc):   {}", hex::encode_upper(config.k1));
    println!("  K2 (mac):   {}", hex::encode_upper(config.k2));

    match config.sdm_builder().url(config.counter) {
        Ok(url) => println!("  sample URL: {}", url),
        Err(e) => {
            eprintln!("error: failed to build sample URL: {}", e);
            process::exit(1);
        }
    }
}

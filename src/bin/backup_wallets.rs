// DANS : src/bin/backup_wallets.rs

use anyhow::{Context, Result, bail};
use std::{env, fs};
use tribify::orchestration::ConsolePrompt;
use tribify::toolkit::Toolkit;
use tribify::wallet::backup::{BackupDocument, export_backup, import_backup};

#[tokio::main]
async fn main() -> Result<()> {
    println!("--- Sauvegarde des sous-portefeuilles ---");
    let args: Vec<String> = env::args().skip(1).collect();
    let (mode, path) = match args.as_slice() {
        [mode, path] => (mode.as_str(), path.as_str()),
        _ => bail!("Usage : backup_wallets export <fichier> | backup_wallets import <fichier>"),
    };

    let toolkit = Toolkit::load().await?;
    match mode {
        "export" => {
            let wallets = toolkit.load_wallets()?;
            let document = export_backup(&toolkit.parent_key(), &wallets);
            fs::write(path, document.to_json()?).with_context(|| format!("Écriture de {path}"))?;
            println!("✅ {} portefeuilles exportés dans {path}. Ce fichier contient les clés privées en clair.", wallets.len());
        }
        "import" => {
            let json = fs::read_to_string(path).with_context(|| format!("Lecture de {path}"))?;
            let document = BackupDocument::from_json(&json)?;
            let wallets = import_backup(&document, toolkit.parent.as_ref(), &ConsolePrompt).await?;
            toolkit.keystore.save(&toolkit.parent_key(), &wallets)?;
            println!("✅ {} portefeuilles importés pour {}.", wallets.len(), toolkit.parent_key());
        }
        other => bail!("Mode inconnu : {other} (export | import)"),
    }
    Ok(())
}

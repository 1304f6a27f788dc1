use anyhow::Context;
use cabfile::Cabinet;

fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .context("usage: readcab <path/to/cabinet.cab>")?;
    let cabinet = Cabinet::open(&path)
        .with_context(|| format!("failed to open cabinet {:?}", path))?;
    println!(
        "Cabinet set #{}, cabinet #{}",
        cabinet.cabinet_set_id(),
        cabinet.cabinet_set_index()
    );
    if let Some((name, disk)) = cabinet.prev_cabinet() {
        println!("Previous cabinet: {:?} on disk {:?}", name, disk);
    }
    if let Some((name, disk)) = cabinet.next_cabinet() {
        println!("Next cabinet: {:?} on disk {:?}", name, disk);
    }
    for (index, folder) in cabinet.folder_entries().enumerate() {
        println!(
            "Folder #{}: {:?}, {} data blocks",
            index,
            folder.compression_type(),
            folder.num_data_blocks()
        );
        for file in folder.file_entries() {
            println!("    {:?} ({} bytes)", file.name(), file.uncompressed_size());
        }
    }
    Ok(())
}

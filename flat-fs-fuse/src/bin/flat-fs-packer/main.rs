mod cli;

use std::fs;
use std::fs::OpenOptions;
use std::io;
use std::sync::Arc;
use std::sync::Mutex;

use block_dev::BlockDevice;
use clap::Parser;
use cli::Cli;
use flat_fs::{BLOCK_SIZE, FileSystem, OpenMode};
use flat_fs_fuse::BlockFile;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    println!("source={:?}\nout_dir={:?}", cli.source, cli.out_dir);

    let block_file: Arc<dyn BlockDevice> = Arc::new(BlockFile(Mutex::new({
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(cli.out_dir.join("fs.img"))?;
        fd.set_len(cli.blocks as u64 * BLOCK_SIZE as u64)?;

        fd
    })));

    let fs = FileSystem::new(block_file, cli.blocks).map_err(io::Error::other)?;
    fs.format(cli.inodes).map_err(io::Error::other)?;

    for entry in fs::read_dir(&cli.source)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            log::warn!("skip non UTF-8 file name {:?}", entry.file_name());
            continue;
        };

        let data = fs::read(entry.path())?;
        let handle = fs.open(&name, OpenMode::Write).map_err(io::Error::other)?;
        let written = fs.write(&handle, &data);
        fs.close(&handle).map_err(io::Error::other)?;
        written.map_err(io::Error::other)?;
        log::info!("file={name:?} size={}", data.len());
    }

    fs.sync().map_err(io::Error::other)?;
    println!("files: {:?}", fs.list());
    log::info!("free blocks: {:?}", fs.free_blocks());

    Ok(())
}

mod block_file;
mod cli;

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use block_dev::BlockDevice;
use clap::Parser;
use flash_fs::{Config, Error, StatKind, Volume};
use typed_bytesize::ByteSizeIec;

pub use self::{
    block_file::BlockFile,
    cli::{Cli, Command},
};

fn main() -> io::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Format { size } => {
            let disk_size = ByteSizeIec::kib(*size).0;
            let fd = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&cli.image)?;
            let device: Arc<dyn BlockDevice> =
                Arc::new(BlockFile::create(fd, cli.block_size, disk_size)?);
            Volume::format(&device).map_err(fs_error)?;
            let geometry = device.geometry();
            println!(
                "image={:?}\nblocks={} block_size={}",
                cli.image, geometry.block_count, geometry.block_size
            );
        }
        Command::Pack { source, dest } => {
            println!("source={source:?}\ndest={dest:?}");
            let mut volume = mount(&cli)?;
            pack(&mut volume, source, dest)?;
            let used = volume.used_blocks().map_err(fs_error)?;
            volume.unmount().map_err(fs_error)?;
            println!("used {used} of {} blocks", volume.geometry().block_count);
        }
        Command::Ls { path } => {
            let mut volume = mount(&cli)?;
            for info in volume.read_dir(path).map_err(fs_error)? {
                match info.stat.kind {
                    StatKind::Directory => println!("{:>10}  {}/", "-", info.name),
                    StatKind::File => println!("{:>10}  {}", info.stat.size, info.name),
                }
            }
            volume.unmount().map_err(fs_error)?;
        }
        Command::Cat { path } => {
            let mut volume = mount(&cli)?;
            let file = volume.open(path, "r").map_err(fs_error)?;
            let mut stdout = io::stdout().lock();
            let mut buf = vec![0; cli.block_size as usize];
            loop {
                let n = volume.read(&file, &mut buf).into_result().map_err(fs_error)?;
                if n == 0 {
                    break;
                }
                stdout.write_all(&buf[..n])?;
            }
            volume.close(file).map_err(fs_error)?;
            volume.unmount().map_err(fs_error)?;
        }
    }

    Ok(())
}

fn fs_error(err: Error) -> io::Error {
    io::Error::other(err.to_string())
}

fn mount(cli: &Cli) -> io::Result<Volume> {
    let fd = OpenOptions::new().read(true).write(true).open(&cli.image)?;
    let device: Arc<dyn BlockDevice> = Arc::new(BlockFile::open(fd, cli.block_size)?);
    Volume::mount(device, Config::default()).map_err(fs_error)
}

/// 递归地把宿主机目录复制到卷内的 `dest` 下
fn pack(volume: &mut Volume, source: &Path, dest: &str) -> io::Result<()> {
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            log::warn!("skipping {:?}: name is not UTF-8", entry.path());
            continue;
        };
        let path = format!("{}/{name}", dest.trim_end_matches('/'));

        if entry.file_type()?.is_dir() {
            match volume.mkdir(&path) {
                Ok(()) | Err(Error::AlreadyExists) => {}
                Err(err) => return Err(fs_error(err)),
            }
            pack(volume, &entry.path(), &path)?;
        } else {
            let data = fs::read(entry.path())?;
            log::info!("file={path:?} size={}", data.len());
            let file = volume.open(&path, "w").map_err(fs_error)?;
            volume.write(&file, &data).into_result().map_err(fs_error)?;
            volume.close(file).map_err(fs_error)?;
        }
    }
    Ok(())
}

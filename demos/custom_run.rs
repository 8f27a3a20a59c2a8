use std::fs;
use std::io::{self, prelude::*};

use env_logger;
use log;

use ext_pq::{ExternalPriorityQueueBuilder, SortedRun};

/// Fixed-width little-endian run format: four bytes per element, no
/// serde involved.
struct RawU32Run {
    reader: io::Take<io::BufReader<fs::File>>,
    remaining: u64,
}

impl SortedRun<u32> for RawU32Run {
    type Error = io::Error;

    fn dump<I>(writer: &mut io::BufWriter<fs::File>, items: I) -> Result<u64, io::Error>
    where
        I: IntoIterator<Item = Result<u32, io::Error>>,
    {
        let mut len = 0;
        for item in items {
            writer.write_all(&item?.to_le_bytes())?;
            len += 1;
        }

        Ok(len)
    }

    fn open(reader: io::Take<io::BufReader<fs::File>>, len: u64) -> Self {
        RawU32Run { reader, remaining: len }
    }

    fn remaining(&self) -> u64 {
        self.remaining
    }

    fn pull(&mut self) -> Result<Option<u32>, io::Error> {
        if self.remaining == 0 {
            return Ok(None);
        }

        let mut buf: [u8; 4] = [0; 4];
        self.reader.read_exact(&mut buf)?;
        self.remaining -= 1;

        Ok(Some(u32::from_le_bytes(buf)))
    }
}

fn main() {
    env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();

    let mut queue = ExternalPriorityQueueBuilder::<u32, RawU32Run>::new()
        .with_buffer_capacity(100_000)
        .build_min()
        .unwrap();

    for value in (0..1_000_000u32).rev() {
        queue.push(value).unwrap();
    }

    for expected in 0..1_000_000u32 {
        assert_eq!(queue.pop().unwrap(), expected);
    }

    println!("raw little-endian runs merged back in order");
}

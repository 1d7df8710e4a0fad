use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use log::debug;

use crate::config::{Direction, Edge};
use crate::error::GpioError;

/// Sequential writes against the sysfs GPIO tree (`export`, `unexport`,
/// and the per-pin `direction`, `edge` and `value` files).
#[derive(Debug, Clone)]
pub struct SysfsControl {
    root: PathBuf,
}

impl SysfsControl {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pin_dir(&self, number: u32) -> PathBuf {
        self.root.join(format!("gpio{number}"))
    }

    pub fn value_path(&self, number: u32) -> PathBuf {
        self.pin_dir(number).join("value")
    }

    pub fn is_exported(&self, number: u32) -> bool {
        self.pin_dir(number).exists()
    }

    pub fn export(&self, number: u32) -> Result<(), GpioError> {
        if self.is_exported(number) {
            debug!("gpio{number} already exported");
            return Ok(());
        }
        write_attr(&self.root.join("export"), &number.to_string())
    }

    pub fn unexport(&self, number: u32) -> Result<(), GpioError> {
        write_attr(&self.root.join("unexport"), &number.to_string())
    }

    pub fn set_direction(&self, number: u32, direction: Direction) -> Result<(), GpioError> {
        write_attr(&self.pin_dir(number).join("direction"), direction.as_str())
    }

    pub fn set_edge(&self, number: u32, edge: Edge) -> Result<(), GpioError> {
        write_attr(&self.pin_dir(number).join("edge"), edge.as_str())
    }

    pub fn open_value(&self, number: u32, direction: Direction) -> Result<File, GpioError> {
        let path = self.value_path(number);
        let mut opts = OpenOptions::new();
        opts.read(true);
        if direction == Direction::Out {
            opts.write(true);
        }
        opts.open(&path).map_err(|e| GpioError::resource(path, e))
    }
}

fn write_attr(path: &Path, contents: &str) -> Result<(), GpioError> {
    fs::write(path, contents).map_err(|e| GpioError::resource(path, e))
}

//! Target CPUs of the robot and the dongle.

pub mod cpu;

pub use cpu::{CPU_TABLE, Cpu, CpuTarget, MemoryType};

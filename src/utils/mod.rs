pub mod command;
pub mod credentials;
pub mod file;
pub mod gds;
pub mod nextflow;
pub mod process;
pub mod publish;
pub mod remote;
pub mod signals;
pub mod streams;
pub mod system;
pub mod transfer;
pub mod vcf;

pub mod gpl;

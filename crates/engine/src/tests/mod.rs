mod compaction_tests;
mod helpers;
mod read_tests;
mod write_tests;

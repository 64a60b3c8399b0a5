pub mod batchitem;

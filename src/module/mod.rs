pub mod conv_pool;

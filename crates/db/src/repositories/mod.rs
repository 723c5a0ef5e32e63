pub mod job_queue_repo;
pub mod task_repo;

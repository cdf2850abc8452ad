// Domain layers - business logic on top of the kernel

pub mod render;

pub mod sys {
    use std::env;
    use tracing::error;

    const KUBERNETES_HOSTNAME_ENV: &str = "ROUTER_POD_NAME";

    #[cfg(unix)]
    #[inline]
    pub fn hostname() -> String {
        env::var(KUBERNETES_HOSTNAME_ENV).unwrap_or_else(|_e| {
            use libc::{c_char, sysconf, _SC_HOST_NAME_MAX};
            use std::os::unix::ffi::OsStringExt;
            // Get the maximum size of host names on this system, and account for the
            // trailing NUL byte.
            let hostname_max = unsafe { sysconf(_SC_HOST_NAME_MAX) };
            let mut buffer = vec![0; (hostname_max as usize) + 1];
            let status_code =
                unsafe { libc::gethostname(buffer.as_mut_ptr() as *mut c_char, buffer.len()) };
            if status_code != 0 {
                error!(
                    "Failed to get hostname {:?}",
                    std::io::Error::last_os_error()
                );
                "_NONE_HOSTNAME".to_string()
            } else {
                let end = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
                buffer.resize(end, 0);
                let hostname_os_string = std::ffi::OsString::from_vec(buffer);
                hostname_os_string.into_string().unwrap()
            }
        })
    }
}

pub mod cpu {
    use std::thread;

    /// Number of logical CPUs visible to this process. Reported as an
    /// informational gauge (`router_process_cpu_core_num`); nothing in
    /// the router sizes a worker pool off it, since each connection gets
    /// its own lightweight tokio task rather than a fixed-size pool.
    pub fn get_total_cpu() -> f32 {
        match thread::available_parallelism() {
            Ok(available_parallelism) => available_parallelism.get() as f32,
            Err(e) => panic!("failed to get available parallelism: {e:?}"),
        }
    }
}

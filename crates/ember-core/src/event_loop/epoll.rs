//! Readiness-model poller: epoll on Unix, a no-op stand-in elsewhere.

use super::event::Direction;

#[cfg(unix)]
pub struct Poller {
    epfd: i32,
    /// fd -> waiter, so a ready event can be mapped back to who to wake.
    waiters: std::sync::Mutex<std::collections::HashMap<i32, usize>>,
}

#[cfg(unix)]
impl Poller {
    pub fn new() -> std::io::Result<Self> {
        let epfd = unsafe { libc::epoll_create1(0) };
        if epfd < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Self {
            epfd,
            waiters: std::sync::Mutex::new(std::collections::HashMap::new()),
        })
    }

    pub fn add(&self, fd: i32, direction: Direction, waiter: usize) -> std::io::Result<()> {
        let events = match direction {
            Direction::In => libc::EPOLLIN,
            Direction::Out => libc::EPOLLOUT,
        } as u32;
        let mut ev = libc::epoll_event {
            events,
            u64: fd as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut ev) };
        if rc < 0 {
            return Err(std::io::Error::last_os_error());
        }
        self.waiters.lock().unwrap().insert(fd, waiter);
        Ok(())
    }

    pub fn remove(&self, fd: i32) -> std::io::Result<()> {
        let rc = unsafe {
            libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
        };
        self.waiters.lock().unwrap().remove(&fd);
        if rc < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn poll(&self, timeout: std::time::Duration) -> Vec<usize> {
        let mut events: [libc::epoll_event; 64] = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            libc::epoll_wait(
                self.epfd,
                events.as_mut_ptr(),
                events.len() as i32,
                timeout.as_millis() as i32,
            )
        };
        if rc <= 0 {
            return Vec::new();
        }
        let waiters = self.waiters.lock().unwrap();
        (0..rc as usize)
            .filter_map(|i| waiters.get(&(events[i].u64 as i32)).copied())
            .collect()
    }
}

#[cfg(unix)]
impl Drop for Poller {
    fn drop(&mut self) {
        unsafe { libc::close(self.epfd) };
    }
}

#[cfg(not(unix))]
pub struct Poller;

#[cfg(not(unix))]
impl Poller {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self)
    }

    pub fn add(&self, _fd: i32, _direction: Direction, _waiter: usize) -> std::io::Result<()> {
        Ok(())
    }

    pub fn remove(&self, _fd: i32) -> std::io::Result<()> {
        Ok(())
    }

    pub fn poll(&self, _timeout: std::time::Duration) -> Vec<usize> {
        Vec::new()
    }
}
